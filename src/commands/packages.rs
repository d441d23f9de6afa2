//! Single-package commands: init, add, list, status, stop, retrack, remove.

use serde_json::Value;

use trackle_core::trackinfo::scalar_str;
use trackle_store::packages::{PackageKey, PackagePatch, PackageRow};
use trackle_store::payloads::Source;
use trackle_store::Database;
use trackle_engine::Engine;

use crate::cli::{AddArgs, KeyArgs, ListArgs, RemoveArgs, StatusArgs};
use crate::commands::Ctx;
use crate::error::{CliError, CliResult};

pub fn init(ctx: &Ctx) -> CliResult<()> {
    let paths = ctx.config.paths();
    paths.ensure()?;
    let db = Database::open(&paths.db)?;

    println!("Initialised trackle storage:");
    println!("  data dir: {}", paths.base.display());
    println!("  db:       {}", db.path().display());
    println!("  inbox:    {}", paths.inbox.display());
    println!("  processed: {}", paths.processed.display());
    Ok(())
}

pub async fn add(ctx: &Ctx, args: AddArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let client = ctx.client()?;

    let lang = args.lang.clone().unwrap_or_else(|| ctx.config.lang.clone());
    let tag = args
        .tag
        .clone()
        .or_else(|| args.label.as_ref().map(|l| l.chars().take(32).collect()))
        .unwrap_or_default();
    let param = args.param.clone().unwrap_or_default();

    let key = PackageKey::new(&args.number, args.carrier, &param);
    let row = engine.packages.upsert(
        &key,
        &PackagePatch {
            label: args.label.clone(),
            tag: Some(tag.clone()),
            lang: Some(lang.clone()),
            api_registered: Some(false),
        },
        &ctx.config.lang,
    )?;

    let item = trackle_client::TrackItem {
        number: key.number.clone(),
        carrier: (key.carrier != 0).then_some(key.carrier),
        param: Some(param.clone()).filter(|p| !p.is_empty()),
        tag: Some(tag.clone()).filter(|t| !t.is_empty()),
        lang: Some(lang.clone()),
    };
    let reply = client.register(&[item]).await?;
    if let Some(rejection) = reply.rejected.first() {
        return Err(CliError::Message(format!(
            "Register failed for {}: {rejection}",
            key.number
        )));
    }

    // The provider may have corrected an auto-detected carrier.
    let resolved = reply
        .accepted
        .first()
        .and_then(|a| a.get("carrier"))
        .and_then(Value::as_i64)
        .filter(|c| *c != 0)
        .unwrap_or(key.carrier);
    let row = engine.packages.resolve_carrier(row.id, resolved)?;

    println!("Added package #{}:", row.id);
    if let Some(label) = &row.label {
        println!("  label:   {label}");
    }
    println!("  number:  {}", row.number);
    println!("  carrier: {}", row.carrier);
    if !row.param.is_empty() {
        println!("  param:   {}", row.param);
    }
    if !row.tag.is_empty() {
        println!("  tag:     {}", row.tag);
    }
    println!("Registered with the provider.");

    if args.status {
        return status(
            ctx,
            StatusArgs {
                key: row.id.to_string(),
                refresh: true,
                events: 10,
                json: false,
            },
        )
        .await;
    }
    Ok(())
}

pub fn list(ctx: &Ctx, args: ListArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let rows = engine.packages.list(args.all)?;

    if rows.is_empty() {
        println!("No packages tracked yet. Use: trackle add <number> --label ...");
        return Ok(());
    }

    println!("Tracked packages:");
    println!(
        "{:<5}{:<27}{:<19}{:<8}{:<13}{:<21}{}",
        "#", "Label", "Number", "Carrier", "Status", "Last event time", "Last event"
    );
    println!("{}", "-".repeat(110));
    for row in &rows {
        println!("{}", fmt_row_short(row));
    }
    Ok(())
}

fn fmt_row_short(row: &PackageRow) -> String {
    let label = row.label.as_deref().unwrap_or("");
    let label = if label.chars().count() > 25 {
        let prefix: String = label.chars().take(24).collect();
        format!("{prefix}\u{2026}")
    } else {
        label.to_owned()
    };
    let status = row
        .last_status
        .as_deref()
        .or(row.package_status.as_deref())
        .or(row.tracking_status.as_deref())
        .unwrap_or("");
    let event_time = row.last_event_time_utc.as_deref().unwrap_or("");
    let desc = row.last_event_desc.as_deref().unwrap_or("");
    let desc: String = desc.chars().take(60).collect();

    format!(
        "#{:<4}{:<27}{:<19}c={:<6}{:<13}{:<21}{}",
        row.id, label, row.number, row.carrier, status, event_time, desc
    )
}

pub async fn status(ctx: &Ctx, args: StatusArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let mut pkg = engine
        .packages
        .find(&args.key)?
        .ok_or_else(|| CliError::NotFound(args.key.clone()))?;

    if args.refresh {
        let client = ctx.client()?;
        let reply = client.get_track_info(&[ctx.track_item(&pkg)]).await?;
        if let Some(rejection) = reply.rejected.first() {
            return Err(CliError::Message(format!("Refresh failed: {rejection}")));
        }
        if let Some(acc) = reply.accepted.first() {
            let sha = Engine::item_hash(acc);
            engine.reconcile(&pkg, acc, sha.as_deref(), Source::Poll)?;
            pkg = engine.packages.get(pkg.id)?;
        }
    }

    let events = engine.events.list_recent(pkg.id, args.events)?;

    if args.json {
        let mut out = serde_json::to_value(&pkg)
            .map_err(|e| CliError::Message(e.to_string()))?;
        out["events"] = serde_json::to_value(&events)
            .map_err(|e| CliError::Message(e.to_string()))?;
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return Ok(());
    }

    println!("Package #{}", pkg.id);
    if let Some(label) = &pkg.label {
        println!("Label:   {label}");
    }
    println!("Number:  {}", pkg.number);
    println!("Carrier: {}", pkg.carrier);
    if !pkg.param.is_empty() {
        println!("Param:   {}", pkg.param);
    }
    if !pkg.tag.is_empty() {
        println!("Tag:     {}", pkg.tag);
    }
    println!("Tracking status: {}", pkg.tracking_status.as_deref().unwrap_or("-"));
    println!("Package status:  {}", pkg.package_status.as_deref().unwrap_or("-"));
    println!(
        "Latest status:   {} (sub: {})",
        pkg.last_status.as_deref().unwrap_or("-"),
        pkg.last_sub_status.as_deref().unwrap_or("-")
    );
    println!(
        "Latest event:    {} - {}",
        pkg.last_event_time_utc.as_deref().unwrap_or("-"),
        pkg.last_event_desc.as_deref().unwrap_or("-")
    );
    if let Some(location) = &pkg.last_location {
        println!("Location:        {location}");
    }
    println!("Last updated:    {}", pkg.last_update_at.as_deref().unwrap_or("-"));

    if !events.is_empty() {
        println!();
        println!("Recent events (max {}):", args.events);
        for event in &events {
            let time = event
                .time_utc
                .as_deref()
                .or(event.time_iso.as_deref())
                .unwrap_or("");
            let desc = event.description.as_deref().unwrap_or("");
            let location = event.location.as_deref().map(display_location).unwrap_or_default();
            if location.is_empty() {
                println!("- {time} {desc}");
            } else {
                println!("- {time} {desc} ({location})");
            }
        }
    }
    Ok(())
}

/// Structured locations are stored as JSON strings; show the most
/// specific place name available.
fn display_location(stored: &str) -> String {
    if !stored.starts_with('{') {
        return stored.to_owned();
    }
    let Ok(value) = serde_json::from_str::<Value>(stored) else {
        return stored.to_owned();
    };
    for field in ["address", "city", "country"] {
        if let Some(text) = value.get(field).and_then(scalar_str) {
            return text;
        }
    }
    String::new()
}

pub async fn stop(ctx: &Ctx, args: KeyArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let pkg = engine
        .packages
        .find(&args.key)?
        .ok_or_else(|| CliError::NotFound(args.key.clone()))?;

    let client = ctx.client()?;
    let reply = client.stop_track(&[ctx.track_item(&pkg)]).await?;
    if let Some(rejection) = reply.rejected.first() {
        return Err(CliError::Message(format!("Stop failed: {rejection}")));
    }

    engine.packages.set_tracking_status(pkg.id, "Stopped")?;
    println!(
        "Stopped tracking for #{} ({}, carrier {}).",
        pkg.id, pkg.number, pkg.carrier
    );
    Ok(())
}

pub async fn retrack(ctx: &Ctx, args: KeyArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let pkg = engine
        .packages
        .find(&args.key)?
        .ok_or_else(|| CliError::NotFound(args.key.clone()))?;

    let client = ctx.client()?;
    let reply = client.retrack(&[ctx.track_item(&pkg)]).await?;
    if let Some(rejection) = reply.rejected.first() {
        return Err(CliError::Message(format!("Retrack failed: {rejection}")));
    }

    engine.packages.set_tracking_status(pkg.id, "Tracking")?;
    println!(
        "Restarted tracking for #{} ({}, carrier {}).",
        pkg.id, pkg.number, pkg.carrier
    );
    Ok(())
}

pub async fn remove(ctx: &Ctx, args: RemoveArgs) -> CliResult<()> {
    let engine = ctx.open_engine()?;
    let pkg = engine
        .packages
        .find(&args.key)?
        .ok_or_else(|| CliError::NotFound(args.key.clone()))?;

    if args.delete_remote {
        let client = ctx.client()?;
        let reply = client.delete_track(&[ctx.track_item(&pkg)]).await?;
        if let Some(rejection) = reply.rejected.first() {
            return Err(CliError::Message(format!("Remote delete failed: {rejection}")));
        }
    }

    engine.packages.delete(pkg.id)?;
    println!("Removed package #{} from local database.", pkg.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_location_prefers_address() {
        assert_eq!(
            display_location(r#"{"address":"123 Depot Rd","city":"Shenzhen"}"#),
            "123 Depot Rd"
        );
        assert_eq!(display_location(r#"{"city":"Shenzhen"}"#), "Shenzhen");
        assert_eq!(display_location("Shenzhen, CN"), "Shenzhen, CN");
        assert_eq!(display_location(r#"{"zip":"518000"}"#), "");
    }

    #[test]
    fn short_row_truncates_long_fields() {
        let row = PackageRow {
            id: 7,
            created_at: String::new(),
            updated_at: String::new(),
            label: Some("a label that is much longer than the column".into()),
            number: "RR123456789CN".into(),
            carrier: 3011,
            param: String::new(),
            tag: String::new(),
            lang: "en".into(),
            api_registered: true,
            tracking_status: Some("Tracking".into()),
            package_status: None,
            last_status: Some("InTransit".into()),
            last_sub_status: None,
            last_event_time_utc: Some("2026-08-20T10:00:00Z".into()),
            last_event_desc: Some("Departed".into()),
            last_location: None,
            last_update_at: None,
            last_payload_sha: None,
            archived: false,
        };
        let line = fmt_row_short(&row);
        assert!(line.starts_with("#7"));
        assert!(line.contains('\u{2026}'));
        assert!(line.contains("InTransit"));
    }
}

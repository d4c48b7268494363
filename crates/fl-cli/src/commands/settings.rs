//! Settings command: show or change the stored user settings.

use std::io::Write;

use anyhow::{Context, Result};
use fl_core::{Settings, Store, TimeWindow};

use super::util::{describe_timezone, format_duration, parse_timezone, write_json};
use crate::{SettingsAction, SettingsUpdate};

pub fn run<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    action: &SettingsAction,
) -> Result<()> {
    match action {
        SettingsAction::Show { json } => {
            let settings = store.load_settings()?;
            if *json {
                return write_json(writer, &settings);
            }
            show(writer, &settings)
        }
        SettingsAction::Set(update) => {
            let mut settings = store.load_settings()?;
            apply(&mut settings, update)?;
            store
                .save_settings(&settings)
                .context("failed to save settings")?;
            tracing::info!(?settings, "settings updated");
            show(writer, &settings)
        }
    }
}

fn show<W: Write>(writer: &mut W, settings: &Settings) -> Result<()> {
    writeln!(
        writer,
        "Daily focus goal:  {}",
        format_duration(settings.daily_focus_goal_secs)
    )?;
    writeln!(writer, "Sleep window:      {}", settings.sleep_window)?;
    match &settings.lunch_window {
        Some(window) => writeln!(writer, "Lunch window:      {window}")?,
        None => writeln!(writer, "Lunch window:      none")?,
    }
    writeln!(
        writer,
        "Timezone:          {}",
        describe_timezone(settings.timezone)
    )?;
    writeln!(
        writer,
        "Flexible weekends: {}",
        if settings.flexible_sleep_days { "yes" } else { "no" }
    )?;
    Ok(())
}

fn apply(settings: &mut Settings, update: &SettingsUpdate) -> Result<()> {
    if let Some(minutes) = update.goal_minutes {
        settings.daily_focus_goal_secs = i64::from(minutes) * 60;
    }
    if let Some(sleep) = &update.sleep {
        settings.sleep_window = sleep
            .parse::<TimeWindow>()
            .with_context(|| format!("invalid sleep window: {sleep}"))?;
    }
    if let Some(lunch) = &update.lunch {
        settings.lunch_window = if lunch.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(
                lunch
                    .parse::<TimeWindow>()
                    .with_context(|| format!("invalid lunch window: {lunch}"))?,
            )
        };
    }
    if let Some(timezone) = &update.timezone {
        settings.timezone = parse_timezone(timezone)?;
    }
    if let Some(flexible) = update.flexible_sleep_days {
        settings.flexible_sleep_days = flexible;
    }
    Ok(())
}

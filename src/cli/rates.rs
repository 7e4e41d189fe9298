use super::ui;
use crate::core::change::percent_change;
use crate::core::config::AppConfig;
use crate::core::store::RateStore;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};

/// Prints the latest rate and its change over the configured window for every pair.
pub async fn show_rates(config: &AppConfig, store: &dyn RateStore) -> Result<()> {
    let now = Utc::now();
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Source"),
        ui::header_cell("Currency"),
        ui::header_cell("Rate"),
        ui::header_cell(&format!("Change ({}h)", config.change_window_hours)),
        ui::header_cell("Updated"),
    ]);

    for source in &config.sources {
        for currency in &source.currencies {
            let currency = currency.to_uppercase();
            let current = store.latest(&source.id, &currency).await?;
            let past = store
                .at_or_before(&source.id, &currency, now - config.change_window())
                .await?;

            let row = match &current {
                Some(obs) => vec![
                    source.id.as_str().into(),
                    currency.as_str().into(),
                    ui::value_cell(obs.value),
                    match past {
                        Some(_) => ui::change_cell(percent_change(current.as_ref(), past.as_ref())),
                        None => ui::na_cell(false),
                    },
                    obs.observed_at.format("%Y-%m-%d %H:%M UTC").to_string().into(),
                ],
                None => vec![
                    source.id.as_str().into(),
                    currency.as_str().into(),
                    ui::na_cell(true),
                    ui::na_cell(false),
                    ui::na_cell(false),
                ],
            };
            table.add_row(row);
        }
    }

    println!("{table}");
    Ok(())
}

/// Prints every observation of one pair over the last `days` days, oldest first.
pub async fn show_history(
    config: &AppConfig,
    store: &dyn RateStore,
    currency: &str,
    source: Option<&str>,
    days: u32,
) -> Result<()> {
    let currency = currency.trim().to_uppercase();
    let policy = config.policy();
    let source = source.unwrap_or(&policy.default_source);
    let since = Duration::try_days(i64::from(days))
        .and_then(|period| Utc::now().checked_sub_signed(period))
        .with_context(|| format!("History period of {days} days is out of range"))?;

    let history = store.history(source, &currency, since).await?;
    if history.is_empty() {
        println!("No {currency} observations from {source} in the last {days} days.");
        return Ok(());
    }

    println!(
        "{}",
        ui::style_text(&format!("{currency} from {source}"), ui::StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Observed"),
        ui::header_cell("Rate"),
        ui::header_cell("Change"),
    ]);

    let mut previous = None;
    for obs in &history {
        let change = match previous {
            Some(_) => ui::change_cell(percent_change(Some(obs), previous)),
            None => ui::na_cell(false),
        };
        table.add_row(vec![
            obs.observed_at.format("%Y-%m-%d %H:%M UTC").to_string().into(),
            ui::value_cell(obs.value),
            change,
        ]);
        previous = Some(obs);
    }

    println!("{table}");
    println!(
        "{}",
        ui::style_text(&format!("{} observations", history.len()), ui::StyleType::Subtle)
    );
    Ok(())
}

use super::ui;
use crate::SubscriberCommand;
use crate::core::subscription::{SubscriberConfig, SubscriberId, SubscriptionRegistry, Subscriptions};
use anyhow::{Result, bail};
use comfy_table::Table;

pub async fn run(subscriptions: &Subscriptions, command: SubscriberCommand) -> Result<()> {
    let configs = match command {
        SubscriberCommand::Add(id) => vec![subscriptions.register(&SubscriberId::new(id)).await?],
        SubscriberCommand::Show(id) => {
            let id = SubscriberId::new(id);
            match subscriptions.get(&id).await? {
                Some(config) => vec![config],
                None => bail!("Subscriber {id} is not registered"),
            }
        }
        SubscriberCommand::List => {
            let configs = subscriptions.list_all().await?;
            if configs.is_empty() {
                println!("No subscribers registered.");
                return Ok(());
            }
            configs
        }
        SubscriberCommand::Threshold { id, value } => {
            vec![subscriptions.set_threshold(&SubscriberId::new(id), value).await?]
        }
        SubscriberCommand::Currency { id, code } => {
            vec![subscriptions.set_currency(&SubscriberId::new(id), &code).await?]
        }
        SubscriberCommand::Source { id, source } => {
            vec![subscriptions.set_source(&SubscriberId::new(id), &source).await?]
        }
        SubscriberCommand::Enable(id) => vec![subscriptions.enable(&SubscriberId::new(id)).await?],
        SubscriberCommand::Disable(id) => vec![subscriptions.disable(&SubscriberId::new(id)).await?],
    };

    println!("{}", subscriber_table(&configs));
    Ok(())
}

fn subscriber_table(configs: &[SubscriberConfig]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Subscriber"),
        ui::header_cell("Currency"),
        ui::header_cell("Source"),
        ui::header_cell("Threshold"),
        ui::header_cell("Alerts"),
        ui::header_cell("Updated"),
    ]);
    for config in configs {
        table.add_row(vec![
            config.subscriber_id.as_str().into(),
            config.currency_code.as_str().into(),
            config.source.as_str().into(),
            format!("{}%", config.threshold_percent.normalize()).into(),
            ui::flag_cell(config.notify_enabled),
            config.updated_at.format("%Y-%m-%d %H:%M UTC").to_string().into(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscription::SubscriptionPolicy;
    use crate::store::memory::MemoryConfigStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn subscriptions() -> Subscriptions {
        Subscriptions::new(
            Arc::new(MemoryConfigStore::new()),
            SubscriptionPolicy {
                currencies: vec!["USD".to_string(), "EUR".to_string()],
                sources: vec!["yahoo".to_string()],
                default_currency: "USD".to_string(),
                default_source: "yahoo".to_string(),
                default_threshold: dec!(1.0),
            },
        )
    }

    #[tokio::test]
    async fn test_commands_mutate_settings() {
        let subs = subscriptions();
        run(&subs, SubscriberCommand::Add("5".to_string())).await.unwrap();
        run(
            &subs,
            SubscriberCommand::Threshold {
                id: "5".to_string(),
                value: dec!(4.5),
            },
        )
        .await
        .unwrap();
        run(&subs, SubscriberCommand::Disable("5".to_string())).await.unwrap();

        let config = subs.get(&SubscriberId::from("5")).await.unwrap().unwrap();
        assert_eq!(config.threshold_percent, dec!(4.5));
        assert!(!config.notify_enabled);
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let subs = subscriptions();
        assert!(run(&subs, SubscriberCommand::Show("x".to_string())).await.is_err());

        run(&subs, SubscriberCommand::Add("x".to_string())).await.unwrap();
        let err = run(
            &subs,
            SubscriberCommand::Currency {
                id: "x".to_string(),
                code: "gbp".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported currency: GBP. Supported currencies: USD, EUR");
    }

    #[test]
    fn test_table_lists_each_subscriber() {
        let config = SubscriberConfig {
            subscriber_id: SubscriberId::from("9"),
            currency_code: "EUR".to_string(),
            source: "yahoo".to_string(),
            threshold_percent: dec!(2.50),
            notify_enabled: true,
            updated_at: chrono::Utc::now(),
        };
        let rendered = subscriber_table(&[config]).to_string();
        assert!(rendered.contains("EUR"));
        assert!(rendered.contains("2.5%"));
    }
}

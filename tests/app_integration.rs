use async_trait::async_trait;
use chrono::{Duration, Utc};
use ratewatch::Service;
use ratewatch::config::AppConfig;
use ratewatch::core::dispatch::{Transport, TransportError};
use ratewatch::core::jobs::{JobKind, JobSummary};
use ratewatch::core::rate::RateObservation;
use ratewatch::core::schedule::{RunOutcome, SchedulerState};
use ratewatch::core::subscription::SubscriberId;
use ratewatch::providers::telegram::TelegramTransport;
use ratewatch::store::Storage;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_yahoo_mock_server(symbol: &str, price: f64) -> MockServer {
        let mock_server = MockServer::start().await;
        let body = format!(
            r#"{{"chart": {{"result": [{{"meta": {{"regularMarketPrice": {price}, "currency": "KZT"}}}}]}}}}"#
        );

        Mock::given(method("GET"))
            .and(path(format!("/v8/finance/chart/{symbol}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub async fn create_telegram_mock_server(expected_messages: u64) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok": true}"#))
            .expect(expected_messages)
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub fn config_yaml(yahoo_url: &str) -> String {
        format!(
            r#"
sources:
  - id: "yahoo"
    kind: yahoo
    base_url: "{yahoo_url}"
    quote_currency: "KZT"
    currencies: ["USD"]
subscriptions:
  currencies: ["USD", "EUR"]
delivery:
  backoff_ms: 1
  batch_pause_ms: 0
"#
        )
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(SubscriberId, String)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, recipient: &SubscriberId, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .await
            .push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

fn load_config(yaml: &str) -> AppConfig {
    let config: AppConfig = serde_yaml::from_str(yaml).expect("Failed to parse config");
    config.validate().expect("Invalid config");
    config
}

#[test_log::test(tokio::test)]
async fn test_threshold_scenario_end_to_end() {
    let config = load_config(&test_utils::config_yaml("http://unused"));
    let transport = Arc::new(RecordingTransport::default());
    let service = Service::new(&config, Storage::in_memory(), Vec::new(), transport.clone()).unwrap();

    let now = Utc::now();
    for (value, hours_ago) in [(dec!(100), 24), (dec!(105), 12), (dec!(103), 0)] {
        service
            .storage
            .rates
            .append(RateObservation::new(
                "yahoo",
                "USD",
                value,
                now - Duration::hours(hours_ago),
            ))
            .await
            .unwrap();
    }

    let sensitive = SubscriberId::from("sensitive");
    let relaxed = SubscriberId::from("relaxed");
    service.subscriptions.register(&sensitive).await.unwrap();
    service.subscriptions.register(&relaxed).await.unwrap();
    service
        .subscriptions
        .set_threshold(&sensitive, dec!(2))
        .await
        .unwrap();
    service
        .subscriptions
        .set_threshold(&relaxed, dec!(5))
        .await
        .unwrap();

    let outcome = service.scheduler.run_now(JobKind::Evaluate).await;
    info!(?outcome, "Evaluation finished");
    assert_eq!(
        outcome,
        RunOutcome::Completed(JobSummary {
            processed: 1,
            failed: 0
        })
    );

    let sent = transport.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, sensitive);
    assert!(sent[0].1.contains("rose by 3.00%"));
    assert!(sent[0].1.contains("Notification threshold: 2%"));
}

#[test_log::test(tokio::test)]
async fn test_full_flow_with_yahoo_and_telegram_mocks() {
    let yahoo = test_utils::create_yahoo_mock_server("USDKZT=X", 525.0).await;
    let telegram = test_utils::create_telegram_mock_server(2).await;

    let config = load_config(&test_utils::config_yaml(&yahoo.uri()));
    let transport = Arc::new(TelegramTransport::new(&telegram.uri(), "TEST").unwrap());
    let service = Service::new(
        &config,
        Storage::in_memory(),
        ratewatch::build_sources(&config),
        transport,
    )
    .unwrap();

    // Yesterday's rate, so the fetched one is a 5% rise
    service
        .storage
        .rates
        .append(RateObservation::new(
            "yahoo",
            "USD",
            dec!(500),
            Utc::now() - Duration::hours(25),
        ))
        .await
        .unwrap();
    service
        .subscriptions
        .register(&SubscriberId::from("100"))
        .await
        .unwrap();

    let ingest = service.scheduler.run_now(JobKind::Ingest).await;
    assert_eq!(
        ingest,
        RunOutcome::Completed(JobSummary {
            processed: 1,
            failed: 0
        })
    );
    let latest = service
        .storage
        .rates
        .latest("yahoo", "USD")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.value, dec!(525));

    let check = service.scheduler.run_now(JobKind::Evaluate).await;
    assert_eq!(
        check,
        RunOutcome::Completed(JobSummary {
            processed: 1,
            failed: 0
        })
    );

    let digest = service.scheduler.run_now(JobKind::Digest).await;
    assert_eq!(
        digest,
        RunOutcome::Completed(JobSummary {
            processed: 1,
            failed: 0
        })
    );
}

#[test_log::test(tokio::test)]
async fn test_subscribers_persist_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("data");
    let config = load_config(&test_utils::config_yaml("http://unused"));
    let id = SubscriberId::from("31337");

    {
        let service = Service::new(
            &config,
            Storage::open(&data_path).unwrap(),
            Vec::new(),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        service.subscriptions.register(&id).await.unwrap();
        service.subscriptions.set_currency(&id, "eur").await.unwrap();
        service
            .storage
            .rates
            .append(RateObservation::new("yahoo", "EUR", dec!(560.5), Utc::now()))
            .await
            .unwrap();
    }

    let reopened = Storage::open(&data_path).unwrap();
    let stored = reopened.configs.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.currency_code, "EUR");
    assert_eq!(stored.source, "yahoo");

    let latest = reopened.rates.latest("yahoo", "EUR").await.unwrap().unwrap();
    assert_eq!(latest.value, dec!(560.5));
}

#[test_log::test(tokio::test)]
async fn test_stopped_scheduler_rejects_runs() {
    let config = load_config(&test_utils::config_yaml("http://unused"));
    let service = Service::new(
        &config,
        Storage::in_memory(),
        Vec::new(),
        Arc::new(RecordingTransport::default()),
    )
    .unwrap();

    assert!(service.scheduler.start().await);
    assert!(!service.scheduler.start().await);
    assert_eq!(service.scheduler.state().await, SchedulerState::Running);

    service.scheduler.stop().await;
    assert_eq!(service.scheduler.state().await, SchedulerState::Stopped);
    assert_eq!(
        service.scheduler.run_now(JobKind::Prune).await,
        RunOutcome::Skipped
    );
}

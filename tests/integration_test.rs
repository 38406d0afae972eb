//! Integration tests for linkrelay
//!
//! These tests drive the full workflow from config loading through record,
//! delivery to the filesystem outbox, and reconcile across restarts.

use linkrelay::communicator::Communicator;
use linkrelay::config::{validate_config, RelayConfig};
use linkrelay::connection::{serialize, Connection};
use linkrelay::dispatch::{
    DispatchError, EmailRequest, EmailTransport, FilesystemOutbox, OutboxEntry, SenderKind,
    SmsRequest, SmsTransport, Translator, TransportError,
};
use linkrelay::storage::{CancelToken, ConnectionFile};
use linkrelay::RelayError;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Config rooted in a temporary directory
fn test_config(dir: &TempDir) -> RelayConfig {
    let mut config = RelayConfig::new();
    config.storage.desired_path = dir.path().join("desired.log");
    config.storage.current_path = dir.path().join("current.log");
    config.outbox.path = dir.path().join("outbox");
    config.email.source = "relay@example.com".to_string();
    config.email.site_label = "www.example.com".to_string();
    config.email.default_reply_to = "antonym@example.com".to_string();
    config.sms.from_number = "+15550000000".to_string();
    config
}

fn communicator_with_outbox(config: &RelayConfig) -> (Communicator, Arc<FilesystemOutbox>) {
    let outbox = Arc::new(FilesystemOutbox::new(&config.outbox.path).unwrap());
    let translator = Translator::new(config.dispatch_settings(), outbox.clone(), outbox.clone());
    let communicator = Communicator::new(
        &config.storage.desired_path,
        &config.storage.current_path,
        translator,
    )
    .with_max_in_flight(config.reconcile.max_in_flight);
    (communicator, outbox)
}

/// Transport that can be switched off to simulate a provider outage
#[derive(Default)]
struct Switchable {
    down: AtomicBool,
}

impl Switchable {
    fn check(&self) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            Err(TransportError::Unavailable("provider down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl EmailTransport for Switchable {
    async fn send_email(&self, _: &EmailRequest) -> Result<(), TransportError> {
        self.check()
    }
}

#[async_trait::async_trait]
impl SmsTransport for Switchable {
    async fn send_sms(&self, _: &SmsRequest) -> Result<(), TransportError> {
        self.check()
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_config_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        let config = test_config(&temp_dir);

        config.save(&config_path).unwrap();
        let loaded = RelayConfig::load(&config_path).unwrap();

        assert_eq!(loaded, config);
        assert!(validate_config(&loaded).is_ok());
    }

    #[test]
    fn test_dispatch_settings_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let settings = test_config(&temp_dir).dispatch_settings();

        assert_eq!(settings.email_source, "relay@example.com");
        assert_eq!(settings.site_label, "www.example.com");
        assert_eq!(settings.sms_from, "+15550000000");
    }
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconcile_spools_to_outbox() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let (communicator, outbox) = communicator_with_outbox(&config);

        communicator
            .record(&Connection::new("ada@example.org", "home@example.com", 100, "hello"))
            .unwrap();
        communicator
            .record(&Connection::new("", "+15551234567", 101, "text me"))
            .unwrap();

        let linked = communicator.reconcile().await.unwrap();
        assert_eq!(linked.len(), 2);

        let emails = outbox.pending(SenderKind::Email).unwrap();
        assert_eq!(emails.len(), 1);
        match &emails[0] {
            OutboxEntry::Email { request, .. } => {
                assert_eq!(request.subject, "ada@example.org -> www.example.com");
                assert_eq!(request.reply_to, "ada@example.org");
                assert_eq!(request.from, "relay@example.com");
                assert_eq!(request.to, vec!["home@example.com".to_string()]);
            }
            other => panic!("expected email, got {:?}", other),
        }

        let texts = outbox.pending(SenderKind::Sms).unwrap();
        assert_eq!(texts.len(), 1);
        match &texts[0] {
            OutboxEntry::Sms { request, .. } => {
                assert_eq!(request.body, "From: antonym\n text me");
                assert_eq!(request.from, "+15550000000");
            }
            other => panic!("expected sms, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restart_converges() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        {
            let (communicator, _) = communicator_with_outbox(&config);
            communicator
                .record(&Connection::new("s@x.com", "a@example.com", 1, "one"))
                .unwrap();
            assert_eq!(communicator.reconcile().await.unwrap().len(), 1);
        }

        // A fresh process over the same logs has nothing left to send
        let (communicator, outbox) = communicator_with_outbox(&config);
        assert!(communicator.reconcile().await.unwrap().is_empty());
        assert_eq!(outbox.pending(SenderKind::Email).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outage_then_recovery() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let transport = Arc::new(Switchable::default());
        let communicator = Communicator::new(
            &config.storage.desired_path,
            &config.storage.current_path,
            Translator::new(config.dispatch_settings(), transport.clone(), transport.clone()),
        );
        let c = Connection::new("s@x.com", "a@example.com", 1, "hello");
        communicator.record(&c).unwrap();

        transport.down.store(true, Ordering::SeqCst);
        assert!(communicator.reconcile().await.unwrap().is_empty());
        assert_eq!(communicator.unsent().unwrap(), vec![c.clone()]);

        transport.down.store(false, Ordering::SeqCst);
        assert_eq!(communicator.reconcile().await.unwrap(), vec![c]);
        assert!(communicator.unsent().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_receiver() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let (communicator, _) = communicator_with_outbox(&config);

        let result = communicator.submit(Connection::new("s", "somewhere", 1, "hi"));

        assert!(matches!(
            result,
            Err(RelayError::Dispatch(DispatchError::UnknownConnectionType(_)))
        ));
        assert_eq!(communicator.stats().unwrap().desired, 0);
    }
}

mod log_compat_tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_without_receive_epoch() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let (communicator, _) = communicator_with_outbox(&config);
        let c = Connection::new("s@x.com", "a@example.com", 42, "legacy");

        // Four-field line written before delivery stamping existed
        let full = serialize(&c);
        let legacy = full.rsplit_once(' ').map(|(head, _)| head).unwrap();
        let mut file = std::fs::File::create(&config.storage.desired_path).unwrap();
        writeln!(file, "{}", legacy).unwrap();
        writeln!(file, "not a record at all").unwrap();

        assert_eq!(communicator.unsent().unwrap(), vec![c.clone()]);
        assert_eq!(communicator.reconcile().await.unwrap(), vec![c.clone()]);

        let current = ConnectionFile::new(&config.storage.current_path);
        assert!(current.find_connection(&c).unwrap());
        let sent: Vec<Connection> = communicator.sent(CancelToken::new()).unwrap().collect();
        assert!(sent[0].is_linked());
    }

    #[test]
    fn test_missing_logs_are_created() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let (communicator, _) = communicator_with_outbox(&config);

        assert!(communicator.unsent().unwrap().is_empty());
        assert!(config.storage.desired_path.exists());
        assert!(config.storage.current_path.exists());
    }
}

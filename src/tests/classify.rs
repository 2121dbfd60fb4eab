use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::classify::process_message;
use crate::core::Core;
use crate::message::SinkMessage;
use crate::model::ProbabilityModel;
use crate::tests::start_mock_smtp;

fn sample(to: &str, auth: &str) -> Vec<u8> {
    format!(
        "Return-Path: <bounce@mail.example.com>\r\n\
         Authentication-Results: sink.example.net; {auth}\r\n\
         From: Sender <sender@example.com>\r\n\
         To: <{to}>\r\n\
         Subject: Weekly deals\r\n\
         Date: Mon, 02 Jan 2023 15:04:05 -0700\r\n\
         \r\n\
         Hello\r\n"
    )
    .into_bytes()
}

fn zero_model() -> ProbabilityModel {
    ProbabilityModel {
        oob: 0.0,
        fbl: 0.0,
        open: 0.0,
        open_again: 0.0,
        click: 0.0,
        click_again: 0.0,
        open_again_given_open: 0.0,
        click_given_open: 0.0,
        click_again_given_click: 0.0,
    }
}

async fn run(core: &Core, raw: &[u8]) -> String {
    let message = SinkMessage::parse(raw).unwrap();
    let http = core.http_client().unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    process_message(core, &zero_model(), &http, "test.msg", &message, &mut rng).await
}

#[tokio::test]
async fn accept_subdomain_terminates_without_network() {
    let core = Core::test();
    let raw = sample("user@accept.example.net", "dkim=pass");

    let line = run(&core, &raw).await;

    assert_eq!(
        line,
        "test.msg,user@accept.example.net,sender@example.com,Accept"
    );
    assert_eq!(core.store.get_int("accept").await, 1);
    assert_eq!(core.store.get_int("total_messages").await, 1);
}

#[tokio::test]
async fn missing_signature_is_a_dkim_failure() {
    let core = Core::test();
    let raw = sample("user@accept.example.net", "dkim=fail");

    let line = run(&core, &raw).await;

    assert!(line.contains("!DKIM fail:"), "{line}");
    assert_eq!(core.store.get_int("fail_dkim").await, 1);
    assert_eq!(core.store.get_int("accept").await, 0);
}

#[tokio::test]
async fn special_subdomain_requires_spf() {
    let core = Core::test();
    let raw = sample("user@oob.example.net", "dkim=pass; spf=fail");

    let line = run(&core, &raw).await;

    assert!(line.contains("!Special oob failed SPF check"), "{line}");
    assert_eq!(core.store.get_int("fail_spf").await, 1);
    assert_eq!(core.store.get_int("oob_sent").await, 0);
}

#[tokio::test]
async fn oob_subdomain_delivers_one_bounce() {
    let (addr, mut sessions) = start_mock_smtp().await;

    let mut core = Core::test();
    core.config.smtp_port = addr.port();
    core.resolver.mx_add(
        "mail.example.com",
        vec![mail_auth::MX {
            exchanges: vec!["mock.smtp.sparkpostmail.com".to_string()],
            preference: 10,
        }],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );
    core.resolver.ipv4_add(
        "mock.smtp.sparkpostmail.com",
        vec![addr.ip().to_string().parse().unwrap()],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );

    let raw = sample("user@oob.example.net", "dkim=pass; spf=pass");
    let line = run(&core, &raw).await;

    assert!(
        line.contains("OOB sent from user@oob.example.net to bounce@mail.example.com"),
        "{line}"
    );
    assert_eq!(core.store.get_int("oob_sent").await, 1);

    let transcript = sessions.recv().await.unwrap();
    assert!(transcript.contains("MAIL FROM:<user@oob.example.net>"));
    assert!(transcript.contains("RCPT TO:<bounce@mail.example.com>"));
    assert!(transcript.contains("Action: failed"));
    assert!(transcript.contains("Subject: Weekly deals"), "embedded original");
}

#[tokio::test]
async fn fbl_subdomain_delivers_one_complaint() {
    let (addr, mut sessions) = start_mock_smtp().await;

    let mut core = Core::test();
    core.config.smtp_port = addr.port();
    core.resolver.mx_add(
        "mail.example.com",
        vec![mail_auth::MX {
            exchanges: vec!["mock.smtp.sparkpostmail.com".to_string()],
            preference: 10,
        }],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );
    core.resolver.ipv4_add(
        "mock.smtp.sparkpostmail.com",
        vec![addr.ip().to_string().parse().unwrap()],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );

    let raw = sample("user@fbl.example.net", "dkim=pass; spf=pass");
    let line = run(&core, &raw).await;

    assert!(line.contains("FBL sent to fbl@sparkpostmail.com"), "{line}");
    assert_eq!(core.store.get_int("fbl_sent").await, 1);

    let transcript = sessions.recv().await.unwrap();
    assert!(transcript.contains("RCPT TO:<fbl@sparkpostmail.com>"));
    assert!(transcript.contains("Feedback-Type: abuse"));
}

#[tokio::test]
async fn unrecognized_return_path_never_sends() {
    let mut core = Core::test();
    core.resolver.mx_add(
        "mail.example.com",
        vec![mail_auth::MX {
            exchanges: vec!["mx.random-isp.example".to_string()],
            preference: 10,
        }],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );

    let raw = sample("user@oob.example.net", "dkim=pass; spf=pass");
    let line = run(&core, &raw).await;

    assert!(
        line.contains("!OOB not sent, Return-Path not recognized"),
        "{line}"
    );
    assert_eq!(core.store.get_int("oob_return_path_not_sparkpost").await, 1);
    assert_eq!(core.store.get_int("oob_sent").await, 0);
}

#[tokio::test]
async fn smtp_fault_is_counted_not_fatal() {
    let mut core = Core::test();
    core.config.smtp_port = 9; // nothing listens here
    core.config.smtp_timeout = std::time::Duration::from_millis(300);
    core.resolver.mx_add(
        "mail.example.com",
        vec![mail_auth::MX {
            exchanges: vec!["mock.smtp.sparkpostmail.com".to_string()],
            preference: 10,
        }],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );
    core.resolver.ipv4_add(
        "mock.smtp.sparkpostmail.com",
        vec!["127.0.0.1".parse().unwrap()],
        std::time::Instant::now() + std::time::Duration::from_secs(60),
    );

    let raw = sample("user@oob.example.net", "dkim=pass; spf=pass");
    let line = run(&core, &raw).await;

    assert!(line.contains("!OOB endpoint returned SMTP error:"), "{line}");
    assert_eq!(core.store.get_int("oob_smtp_error").await, 1);
}

use std::net::SocketAddr;
use std::time::Duration;

use mail_auth::Resolver;
use mail_send::smtp::AssertReply;
use mail_send::SmtpClient;
use tokio::io::AsyncWriteExt;

use crate::resolver::first_ip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { via: String },
    Failed { reason: String },
}

// Submit one synthesized report over a direct SMTP session. Protocol-level
// acceptance of the message data is success; every connection or protocol
// fault is folded into a Failed outcome so a broken exchange can never
// abort the batch.
pub async fn deliver(
    resolver: &Resolver,
    ehlo_hostname: &str,
    env_from: &str,
    env_to: &str,
    raw_message: &[u8],
    exchange: &str,
    port: u16,
    timeout: Duration,
) -> DeliveryOutcome {
    let Some(ip) = first_ip(resolver, exchange).await else {
        return DeliveryOutcome::Failed {
            reason: format!("no address records for {exchange}"),
        };
    };

    match tokio::time::timeout(
        timeout,
        submit(
            SocketAddr::new(ip, port),
            ehlo_hostname,
            env_from,
            env_to,
            raw_message,
            timeout,
        ),
    )
    .await
    {
        Ok(Ok(())) => DeliveryOutcome::Delivered {
            via: exchange.to_string(),
        },
        Ok(Err(err)) => DeliveryOutcome::Failed {
            reason: err.to_string(),
        },
        Err(_) => DeliveryOutcome::Failed {
            reason: format!("timeout talking to {exchange}"),
        },
    }
}

async fn submit(
    addr: SocketAddr,
    ehlo_hostname: &str,
    env_from: &str,
    env_to: &str,
    raw_message: &[u8],
    timeout: Duration,
) -> Result<(), mail_send::Error> {
    let mut client = SmtpClient::connect(addr, timeout).await?;
    client.timeout = timeout;

    client.read().await?.assert_code(220)?;
    client
        .stream
        .write_all(format!("EHLO {ehlo_hostname}\r\n").as_bytes())
        .await?;
    client.read_ehlo().await?;

    client
        .cmd(format!("MAIL FROM:<{env_from}>\r\n").as_bytes())
        .await?
        .assert_positive_completion()?;
    client
        .cmd(format!("RCPT TO:<{env_to}>\r\n").as_bytes())
        .await?
        .assert_positive_completion()?;
    client.cmd(b"DATA\r\n").await?.assert_code(354)?;
    client.write_message(raw_message).await?;
    client.read().await?.assert_positive_completion()?;
    let _ = client.cmd(b"QUIT\r\n").await;

    Ok(())
}

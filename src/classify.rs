use std::time::SystemTime;

use rand::Rng;

use crate::core::Core;
use crate::message::{AddressPart, SinkMessage};
use crate::model::ProbabilityModel;
use crate::report::deliver::{deliver, DeliveryOutcome};
use crate::report::{build_bounce, build_complaint, BounceFields, ComplaintFields};
use crate::resolver::resolve_feedback_route;
use crate::tracking::Tracker;

// Recipient subdomains that force an action regardless of the model
const SUBDOMAIN_OOB: &str = "oob";
const SUBDOMAIN_FBL: &str = "fbl";
const SUBDOMAIN_OPENCLICK: &str = "openclick";
const SUBDOMAIN_ACCEPT: &str = "accept";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Oob,
    Fbl,
    Open,
    Accept,
}

// Priority chain over independent draws: a message that bounces would
// never reach the inbox, so it cannot complain or be opened; a message
// that complains is not opened either. Only the first event to fire is
// acted on. The open draw is skipped entirely when the cohort gate is
// closed for this recipient today.
pub fn decide<R: Rng>(rng: &mut R, model: &ProbabilityModel, open_eligible: bool) -> Decision {
    if rng.gen::<f64>() <= model.oob {
        Decision::Oob
    } else if rng.gen::<f64>() <= model.fbl {
        Decision::Fbl
    } else if open_eligible && rng.gen::<f64>() <= model.open {
        Decision::Open
    } else {
        Decision::Accept
    }
}

fn xstr(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

// Classify one parsed message and perform its terminal action, returning
// the completed log line. Expected domain outcomes (failed authentication,
// unrecognized destinations, SMTP errors) are all folded into the line;
// nothing here may abort the batch.
pub async fn process_message<R: Rng>(
    core: &Core,
    model: &ProbabilityModel,
    http: &reqwest::Client,
    name: &str,
    message: &SinkMessage<'_>,
    rng: &mut R,
) -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    core.store.increment("total_messages").await;
    core.store.increment_ts(now).await;

    // Rogue and spammy messages have been seen without From or To
    let mut line = format!(
        "{},{},{}",
        name,
        xstr(message.to_address()),
        xstr(message.from_address())
    );
    line.push(',');
    line.push_str(&classify(core, model, http, message, now, rng).await);
    line
}

async fn classify<R: Rng>(
    core: &Core,
    model: &ProbabilityModel,
    http: &reqwest::Client,
    message: &SinkMessage<'_>,
    now: u64,
    rng: &mut R,
) -> String {
    // Only mail that carries a valid upstream signature is acted on
    if !message.dkim_pass() {
        core.store.increment("fail_dkim").await;
        return format!("!DKIM fail:{}", xstr(message.auth_results()));
    }

    let Some(to) = message.to_address() else {
        core.store.increment("skipped").await;
        return "!Missing To:".to_string();
    };

    match to.subdomain_part() {
        SUBDOMAIN_OOB => {
            if message.spf_pass() {
                oob_gen(core, message).await
            } else {
                core.store.increment("fail_spf").await;
                format!("!Special {SUBDOMAIN_OOB} failed SPF check")
            }
        }
        SUBDOMAIN_FBL => {
            if message.spf_pass() {
                fbl_gen(core, message).await
            } else {
                core.store.increment("fail_spf").await;
                format!("!Special {SUBDOMAIN_FBL} failed SPF check")
            }
        }
        SUBDOMAIN_OPENCLICK => open_click(core, model, http, message, rng).await,
        SUBDOMAIN_ACCEPT => {
            core.store.increment("accept").await;
            "Accept".to_string()
        }
        _ => {
            let digit = to.cohort_digit(&core.config.cohort.prefix);
            let day = mail_parser::DateTime::from_timestamp(now as i64).day;
            let open_eligible =
                digit.map_or(true, |digit| core.config.cohort.digit_active(digit, day));

            match decide(rng, model, open_eligible) {
                Decision::Oob => oob_gen(core, message).await,
                Decision::Fbl => fbl_gen(core, message).await,
                Decision::Open => open_click(core, model, http, message, rng).await,
                Decision::Accept => {
                    core.store.increment("accept").await;
                    match digit {
                        Some(digit) if !open_eligible => {
                            format!("Accept (cohort digit {digit} idle on day {day})")
                        }
                        _ => "Accept".to_string(),
                    }
                }
            }
        }
    }
}

// Generate and deliver an out-of-band bounce toward the Return-Path,
// addressed from the sink recipient.
async fn oob_gen(core: &Core, message: &SinkMessage<'_>) -> String {
    let Some(return_path) = message.return_path() else {
        core.store.increment("oob_missing_return_path").await;
        return "!Missing Return-Path:".to_string();
    };
    let Some(to) = message.to_address() else {
        core.store.increment("oob_missing_to").await;
        return "!Missing To:".to_string();
    };

    let Some(route) = resolve_feedback_route(&core.resolver, return_path).await else {
        core.store.increment("oob_return_path_not_sparkpost").await;
        return "!OOB not sent, Return-Path not recognized as SparkPost".to_string();
    };

    let bounce = build_bounce(&BounceFields {
        from: to,
        to: return_path,
        arrival_date: message.date_rfc822(),
        raw_message: message.raw,
    });
    match deliver(
        &core.resolver,
        &core.config.hostname,
        to,
        return_path,
        &bounce,
        &route.exchange,
        core.config.smtp_port,
        core.config.smtp_timeout,
    )
    .await
    {
        DeliveryOutcome::Delivered { via } => {
            core.store.increment("oob_sent").await;
            format!("OOB sent from {to} to {return_path} via {via}")
        }
        DeliveryOutcome::Failed { reason } => {
            core.store.increment("oob_smtp_error").await;
            format!("!OOB endpoint returned SMTP error: {reason}")
        }
    }
}

// Generate and deliver an abuse complaint to the platform's feedback-loop
// mailbox for the Return-Path's exchange.
async fn fbl_gen(core: &Core, message: &SinkMessage<'_>) -> String {
    let Some(return_path) = message.return_path() else {
        core.store.increment("fbl_missing_return_path").await;
        return "!Missing Return-Path:".to_string();
    };
    let Some(to) = message.to_address() else {
        core.store.increment("fbl_missing_to").await;
        return "!Missing To:".to_string();
    };

    let Some(route) = resolve_feedback_route(&core.resolver, return_path).await else {
        core.store.increment("fbl_return_path_not_sparkpost").await;
        return "!FBL not sent, Return-Path not recognized as SparkPost".to_string();
    };

    let complaint = build_complaint(&ComplaintFields {
        from: to,
        to: &route.fbl_to,
        original_sender: return_path,
        subject: message.subject(),
        arrival_date: message.date_rfc822(),
        source_ip: message.source_ip(),
        raw_message: message.raw,
    });
    match deliver(
        &core.resolver,
        &core.config.hostname,
        to,
        &route.fbl_to,
        &complaint,
        &route.exchange,
        core.config.smtp_port,
        core.config.smtp_timeout,
    )
    .await
    {
        DeliveryOutcome::Delivered { via } => {
            core.store.increment("fbl_sent").await;
            format!("FBL sent to {} via {via}", route.fbl_to)
        }
        DeliveryOutcome::Failed { reason } => {
            core.store.increment("fbl_smtp_error").await;
            format!("!FBL endpoint returned SMTP error: {reason}")
        }
    }
}

async fn open_click<R: Rng>(
    core: &Core,
    model: &ProbabilityModel,
    http: &reqwest::Client,
    message: &SinkMessage<'_>,
    rng: &mut R,
) -> String {
    match message.html_body() {
        // A message without an HTML part has nothing to open
        None => String::new(),
        Some(body) => {
            Tracker { core, http }
                .simulate(body.as_ref(), model, rng)
                .await
        }
    }
}

use std::net::IpAddr;

use mail_auth::Resolver;

use crate::message::AddressPart;

// Exchange-host suffixes that provably belong to the platform's own inbound
// relays. Reports are only ever addressed to one of these; anything else is
// treated as an unrecognized destination to avoid originating backscatter.
const SUFFIX_US: &str = "smtp.sparkpostmail.com";
const SUFFIX_ENTERPRISE: &str = "e.sparkpost.com";
const SUFFIX_EU: &str = "smtp.eu.sparkpostmail.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRoute {
    pub exchange: String,
    pub fbl_to: String,
}

// Map a recognized exchange host to its feedback-loop mailbox.
pub fn feedback_mailbox(exchange: &str) -> Option<String> {
    if exchange.ends_with(SUFFIX_EU) {
        Some("fbl@eu.sparkpostmail.com".to_string())
    } else if exchange.ends_with(SUFFIX_US) {
        Some("fbl@sparkpostmail.com".to_string())
    } else if exchange.ends_with(SUFFIX_ENTERPRISE) {
        let tenant = exchange.split('.').next().unwrap_or_default();
        if !tenant.is_empty() && !exchange.starts_with(SUFFIX_ENTERPRISE) {
            Some(format!("fbl@{tenant}.mail.e.sparkpost.com"))
        } else {
            None
        }
    } else {
        None
    }
}

// Resolve the Return-Path domain to the platform exchange host that should
// receive synthesized reports, plus the matching feedback-loop address.
// Returns None for resolution failures and for hosts that are not
// recognized as the platform's own relays.
pub async fn resolve_feedback_route(
    resolver: &Resolver,
    return_path: &str,
) -> Option<FeedbackRoute> {
    let domain = return_path.domain_part();
    if domain.is_empty() {
        return None;
    }

    let exchange = match resolver.mx_lookup(domain).await {
        Ok(mx_list) => mx_list
            .iter()
            .min_by_key(|mx| mx.preference)
            .and_then(|mx| mx.exchanges.first())
            .map(|host| host.trim_end_matches('.').to_string()),
        Err(_) => None,
    };

    let exchange = match exchange {
        Some(exchange) => exchange,
        None => {
            // No MX: treat a resolvable address record as an implicit
            // exchange on the bare domain.
            resolver.ip_lookup(domain).await.ok()?.next()?;
            domain.trim_end_matches('.').to_string()
        }
    };

    feedback_mailbox(&exchange).map(|fbl_to| FeedbackRoute { exchange, fbl_to })
}

pub async fn first_ip(resolver: &Resolver, host: &str) -> Option<IpAddr> {
    resolver.ip_lookup(host).await.ok()?.next()
}

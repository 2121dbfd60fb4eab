use std::borrow::Cow;
use std::net::IpAddr;

use mail_parser::{Address, HeaderName, HeaderValue, Message, MessageParser};

// Inbound message headers with special meaning to the sink
pub const HDR_FBL_TOKEN: &str = "X-MSFBL";
pub const HDR_SINK_MARKER: &str = "X-Sink";

pub struct SinkMessage<'x> {
    pub raw: &'x [u8],
    inner: Message<'x>,
}

impl<'x> SinkMessage<'x> {
    pub fn parse(raw: &'x [u8]) -> Option<Self> {
        MessageParser::default()
            .parse(raw)
            .map(|inner| SinkMessage { raw, inner })
    }

    pub fn to_address(&self) -> Option<&str> {
        self.inner.to().and_then(first_address)
    }

    pub fn from_address(&self) -> Option<&str> {
        self.inner.from().and_then(first_address)
    }

    // Return-Path with any angle brackets removed
    pub fn return_path(&self) -> Option<&str> {
        match self.inner.header("Return-Path")? {
            HeaderValue::Address(address) => first_address(address),
            HeaderValue::Text(text) => {
                let text = text
                    .as_ref()
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>');
                if !text.is_empty() {
                    Some(text)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn auth_results(&self) -> Option<&str> {
        self.inner
            .header("Authentication-Results")
            .and_then(|value| value.as_text())
    }

    pub fn dkim_pass(&self) -> bool {
        self.auth_results()
            .map_or(false, |auth| auth.contains("dkim=pass"))
    }

    pub fn spf_pass(&self) -> bool {
        self.auth_results()
            .map_or(false, |auth| auth.contains("spf=pass"))
    }

    pub fn fbl_token(&self) -> Option<&str> {
        self.inner
            .header(HDR_FBL_TOKEN)
            .and_then(|value| value.as_text())
    }

    // A sink marker of "archive" asks for the spool file to be kept
    pub fn archive_requested(&self) -> bool {
        self.inner
            .header(HDR_SINK_MARKER)
            .and_then(|value| value.as_text())
            .map_or(false, |value| value.eq_ignore_ascii_case("archive"))
    }

    // Source IP taken from the topmost Received header that carries one
    pub fn source_ip(&self) -> Option<IpAddr> {
        self.inner.headers().iter().find_map(|header| {
            if let (HeaderName::Received, HeaderValue::Received(received)) =
                (&header.name, &header.value)
            {
                received.from_ip()
            } else {
                None
            }
        })
    }

    pub fn subject(&self) -> Option<&str> {
        self.inner.subject()
    }

    pub fn date_rfc822(&self) -> Option<String> {
        self.inner.date().map(|date| date.to_rfc822())
    }

    pub fn html_body(&'x self) -> Option<Cow<'x, str>> {
        self.inner.body_html(0)
    }
}

fn first_address<'x>(address: &'x Address<'x>) -> Option<&'x str> {
    match address {
        Address::List(list) => list.first().and_then(|addr| addr.address.as_deref()),
        Address::Group(groups) => groups
            .first()
            .and_then(|group| group.addresses.first())
            .and_then(|addr| addr.address.as_deref()),
    }
}

pub trait AddressPart {
    fn local_part(&self) -> &str;
    fn domain_part(&self) -> &str;
    fn subdomain_part(&self) -> &str;
    fn cohort_digit(&self, traffic_prefix: &str) -> Option<u8>;
}

impl AddressPart for str {
    fn local_part(&self) -> &str {
        self.rsplit_once('@').map_or(self, |(local, _)| local)
    }

    fn domain_part(&self) -> &str {
        self.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    // Label before the first dot of the domain part
    fn subdomain_part(&self) -> &str {
        self.domain_part()
            .split_once('.')
            .map_or(self.domain_part(), |(label, _)| label)
    }

    // Trailing digit of the local part (any +tag removed), only for
    // recipients generated with the configured traffic prefix.
    fn cohort_digit(&self, traffic_prefix: &str) -> Option<u8> {
        let local = self.local_part();
        let local = local.split_once('+').map_or(local, |(name, _)| name);
        if traffic_prefix.is_empty() || !local.starts_with(traffic_prefix) {
            return None;
        }
        local
            .chars()
            .next_back()
            .filter(|c| c.is_ascii_digit())
            .map(|c| c as u8 - b'0')
    }
}

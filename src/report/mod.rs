use std::fmt::Write;
use std::net::IpAddr;

use mail_builder::headers::content_type::ContentType;
use mail_builder::headers::HeaderType;
use mail_builder::mime::{make_boundary, BodyPart, MimePart};
use mail_builder::MessageBuilder;

use crate::message::AddressPart;

pub mod deliver;

// Substituted whenever the source message lacks an optional field; a
// missing header must never fail a report build.
const PLACEHOLDER: &str = "unknown";

pub struct ComplaintFields<'x> {
    // Mailbox the complaint claims to come from (the sink recipient)
    pub from: &'x str,
    // Feedback-loop mailbox on the platform side
    pub to: &'x str,
    // Envelope sender of the original message (Return-Path)
    pub original_sender: &'x str,
    pub subject: Option<&'x str>,
    pub arrival_date: Option<String>,
    pub source_ip: Option<IpAddr>,
    pub raw_message: &'x [u8],
}

pub struct BounceFields<'x> {
    // The sink recipient the original message was addressed to
    pub from: &'x str,
    // Where the bounce goes: the original Return-Path
    pub to: &'x str,
    pub arrival_date: Option<String>,
    pub raw_message: &'x [u8],
}

// Abuse Reporting Format complaint (RFC 5965): plain-text notice,
// machine-readable feedback report and the original message verbatim.
pub fn build_complaint(fields: &ComplaintFields<'_>) -> Vec<u8> {
    let arrival = fields
        .arrival_date
        .clone()
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let source_ip = fields
        .source_ip
        .map_or_else(|| PLACEHOLDER.to_string(), |ip| ip.to_string());
    let reported_domain = fields.original_sender.domain_part();

    let mut txt = String::with_capacity(256);
    let _ = write!(
        txt,
        "This is an email abuse report for a message received from IP {source_ip} \
         on {arrival}.\r\nFor more information about this format please see \
         https://datatracker.ietf.org/doc/html/rfc5965\r\n"
    );

    let mut report = String::with_capacity(256);
    report.push_str("Feedback-Type: abuse\r\n");
    let _ = write!(report, "User-Agent: {}\r\n", crate::USER_AGENT);
    report.push_str("Version: 1\r\n");
    let _ = write!(report, "Original-Mail-From: <{}>\r\n", fields.original_sender);
    let _ = write!(report, "Original-Rcpt-To: <{}>\r\n", fields.from);
    let _ = write!(report, "Arrival-Date: {arrival}\r\n");
    let _ = write!(report, "Source-IP: {source_ip}\r\n");
    let _ = write!(report, "Reported-Domain: {reported_domain}\r\n");

    MessageBuilder::new()
        .header("From", HeaderType::Text(format!("<{}>", fields.from).into()))
        .header("To", HeaderType::Text(format!("<{}>", fields.to).into()))
        .message_id(format!(
            "<{}@{}>",
            make_boundary("."),
            fields.from.domain_part()
        ))
        .subject(format!(
            "FW: {}",
            fields.subject.unwrap_or("(no subject)")
        ))
        .body(MimePart::new(
            ContentType::new("multipart/report").attribute("report-type", "feedback-report"),
            BodyPart::Multipart(vec![
                MimePart::new(ContentType::new("text/plain"), BodyPart::Text(txt.into())),
                MimePart::new(
                    ContentType::new("message/feedback-report"),
                    BodyPart::Text(report.into()),
                ),
                MimePart::new(
                    ContentType::new("message/rfc822"),
                    BodyPart::Text(String::from_utf8_lossy(fields.raw_message).into_owned().into()),
                ),
            ]),
        ))
        .write_to_vec()
        .unwrap_or_default()
}

// Out-of-band bounce: a delivery-status notification claiming the sink
// recipient does not exist, addressed back to the Return-Path.
pub fn build_bounce(fields: &BounceFields<'_>) -> Vec<u8> {
    let arrival = fields
        .arrival_date
        .clone()
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let from_domain = fields.from.domain_part();
    let to_domain = fields.to.domain_part();

    let mut txt = String::with_capacity(512);
    let _ = write!(
        txt,
        "The original message was received at {arrival}\r\nfrom {from_domain}\r\n\r\n"
    );
    txt.push_str("   ----- The following addresses had permanent fatal errors -----\r\n");
    let _ = write!(txt, "<{}>\r\n", fields.from);
    let _ = write!(txt, "    (reason: 550 5.0.0 <{}>... User unknown)\r\n\r\n", fields.from);
    txt.push_str("   ----- Transcript of session follows -----\r\n");
    let _ = write!(txt, "... while talking to {to_domain}:\r\n");
    txt.push_str(">>> DATA\r\n");
    let _ = write!(txt, "<<< 550 5.0.0 <{}>... User unknown\r\n", fields.from);
    let _ = write!(txt, "550 5.1.1 <{}>... User unknown\r\n", fields.from);
    txt.push_str("<<< 503 5.0.0 Need RCPT (recipient)\r\n");

    let mut dsn = String::with_capacity(256);
    let _ = write!(dsn, "Reporting-MTA: dns;{from_domain}\r\n");
    let _ = write!(dsn, "Received-From-MTA: dns;{to_domain}\r\n");
    let _ = write!(dsn, "Arrival-Date: {arrival}\r\n\r\n");
    let _ = write!(dsn, "Final-Recipient: rfc822;{}\r\n", fields.from);
    dsn.push_str("Action: failed\r\n");
    dsn.push_str("Status: 5.0.0\r\n");
    let _ = write!(dsn, "Remote-MTA: dns;{from_domain}\r\n");
    let _ = write!(
        dsn,
        "Diagnostic-Code: smtp;550 5.0.0 <{}>... User unknown\r\n",
        fields.from
    );
    let _ = write!(dsn, "Last-Attempt-Date: {arrival}\r\n");

    MessageBuilder::new()
        .header("From", HeaderType::Text(format!("<{}>", fields.from).into()))
        .header("To", HeaderType::Text(format!("<{}>", fields.to).into()))
        .header(
            "Auto-Submitted",
            HeaderType::Text("auto-generated (failure)".into()),
        )
        .message_id(format!("<{}@{}>", make_boundary("."), from_domain))
        .subject("Returned mail: see transcript for details")
        .body(MimePart::new(
            ContentType::new("multipart/report").attribute("report-type", "delivery-status"),
            BodyPart::Multipart(vec![
                MimePart::new(ContentType::new("text/plain"), BodyPart::Text(txt.into())),
                MimePart::new(
                    ContentType::new("message/delivery-status"),
                    BodyPart::Text(dsn.into()),
                ),
                MimePart::new(
                    ContentType::new("message/rfc822"),
                    BodyPart::Text(String::from_utf8_lossy(fields.raw_message).into_owned().into()),
                ),
            ]),
        ))
        .write_to_vec()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use mail_parser::MessageParser;

    use super::{build_bounce, build_complaint, BounceFields, ComplaintFields};

    const ORIGINAL: &[u8] =
        b"From: <a@b.com>\r\nTo: <sink@fbl.example.net>\r\nSubject: Earn money\r\n\r\nSpam\r\n";

    #[test]
    fn complaint_with_missing_fields() {
        let raw = build_complaint(&ComplaintFields {
            from: "sink@fbl.example.net",
            to: "fbl@sparkpostmail.com",
            original_sender: "a@b.com",
            subject: Some("Earn money"),
            arrival_date: None,
            source_ip: None,
            raw_message: ORIGINAL,
        });
        let text = String::from_utf8(raw.clone()).unwrap();

        assert!(text.contains("multipart/report"));
        assert!(text.contains("feedback-report"));
        assert!(text.contains("Feedback-Type: abuse"));
        assert!(text.contains("Original-Mail-From: <a@b.com>"));
        assert!(text.contains("Arrival-Date: unknown"));
        assert!(text.contains("Source-IP: unknown"));
        assert!(text.contains("Reported-Domain: b.com"));
        assert!(text.contains("Subject: FW: Earn money"));
        assert!(text.contains("Subject: Earn money"));

        // Still a well-formed multipart: every boundary line is paired and
        // the embedded original survives verbatim
        assert!(MessageParser::default().parse(&raw).is_some());
        let boundary = text
            .lines()
            .find_map(|line| {
                line.split_once("boundary=")
                    .map(|(_, b)| b.trim().trim_end_matches(';').trim_matches('"'))
            })
            .unwrap()
            .to_string();
        assert_eq!(
            text.matches(&format!("--{boundary}")).count(),
            4,
            "three section markers plus one terminator"
        );
        assert!(text.contains("Spam"));
    }

    #[test]
    fn bounce_report() {
        let raw = build_bounce(&BounceFields {
            from: "sink@oob.example.net",
            to: "bounce@mail.b.com",
            arrival_date: Some("Mon, 02 Jan 2023 15:04:05 -0700".to_string()),
            raw_message: ORIGINAL,
        });
        let text = String::from_utf8(raw.clone()).unwrap();

        assert!(text.contains("multipart/report"));
        assert!(text.contains("delivery-status"));
        assert!(text.contains("Auto-Submitted: auto-generated (failure)"));
        assert!(text.contains("Final-Recipient: rfc822;sink@oob.example.net"));
        assert!(text.contains("Action: failed"));
        assert!(text.contains("Status: 5.0.0"));
        assert!(text.contains("Remote-MTA: dns;oob.example.net"));
        assert!(text.contains("Arrival-Date: Mon, 02 Jan 2023 15:04:05 -0700"));
        assert!(MessageParser::default().parse(&raw).is_some());
    }
}

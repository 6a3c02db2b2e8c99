//! Forwarding sample measurements to an InfluxDB-compatible backend.
//!
//! Measurements are assembled into influx line protocol and buffered;
//! [`MetricsSender::flush`] ships the buffer over HTTP or UDP. Senders are
//! constructed explicitly and injected wherever samples are recorded;
//! losing a metrics packet is logged and never fails a sample.

use std::str::FromStr;

use async_trait::async_trait;
use strum_macros::EnumString;

use crate::GrebeError;

/// How the line protocol buffer is shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricsProtocol {
    Http,
    Udp,
}

/// One field value in a measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// Escape a measurement name, tag key, or tag value: spaces, commas and
/// equals signs are backslash-escaped per the line protocol.
pub fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

/// Escape a string field value: backslashes and double quotes.
pub fn escape_field_text(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Assemble one line of influx line protocol:
/// `measurement,tag=value field=value timestamp`.
///
/// Tags and fields appear in the order given; `timestamp_ns` is optional
/// and in nanoseconds since the epoch.
pub fn format_line(
    measurement: &str,
    tags: &[(&str, &str)],
    fields: &[(&str, FieldValue)],
    timestamp_ns: Option<i64>,
) -> String {
    let mut line = escape_tag(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }
    line.push(' ');
    let mut first = true;
    for (key, value) in fields {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(&escape_tag(key));
        line.push('=');
        match value {
            FieldValue::Float(f) => line.push_str(&f.to_string()),
            FieldValue::Integer(i) => line.push_str(&format!("{}i", i)),
            FieldValue::Boolean(b) => line.push_str(if *b { "true" } else { "false" }),
            FieldValue::Text(t) => line.push_str(&format!("\"{}\"", escape_field_text(t))),
        }
    }
    if let Some(timestamp) = timestamp_ns {
        line.push(' ');
        line.push_str(&timestamp.to_string());
    }
    line
}

/// Buffers line protocol and ships it to a backend.
#[async_trait]
pub trait MetricsSender: Send + Sync {
    /// Buffer one line of line protocol.
    fn add_metric(&mut self, line: String);

    /// The number of buffered lines.
    fn buffered(&self) -> usize;

    /// Ship and clear the buffer. A flush with nothing buffered is a
    /// no-op.
    async fn flush(&mut self) -> Result<(), GrebeError>;
}

/// Ships line protocol with an HTTP POST to an influx write endpoint.
pub struct HttpMetricsSender {
    client: reqwest::Client,
    endpoint: String,
    buffer: Vec<String>,
}

impl HttpMetricsSender {
    /// `endpoint` is the full write URL, for example
    /// `http://influx.example.com:8086/write?db=samples`.
    pub fn new(endpoint: &str) -> HttpMetricsSender {
        HttpMetricsSender {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl MetricsSender for HttpMetricsSender {
    fn add_metric(&mut self, line: String) {
        self.buffer.push(line);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn flush(&mut self) -> Result<(), GrebeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let body = self.buffer.join("\n");
        let lines = self.buffer.len();
        self.buffer.clear();
        let response = self.client.post(&self.endpoint).body(body).send().await?;
        if !response.status().is_success() {
            warn!(
                "metrics endpoint {} answered {} for {} line(s)",
                self.endpoint,
                response.status(),
                lines
            );
        } else {
            trace!("flushed {} metric line(s) to {}", lines, self.endpoint);
        }
        Ok(())
    }
}

/// Ships line protocol as UDP datagrams, one buffer per flush.
pub struct UdpMetricsSender {
    /// Backend address as `host:port`.
    endpoint: String,
    buffer: Vec<String>,
}

impl UdpMetricsSender {
    pub fn new(endpoint: &str) -> UdpMetricsSender {
        UdpMetricsSender {
            endpoint: endpoint.to_string(),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl MetricsSender for UdpMetricsSender {
    fn add_metric(&mut self, line: String) {
        self.buffer.push(line);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn flush(&mut self) -> Result<(), GrebeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let body = self.buffer.join("\n");
        self.buffer.clear();
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(body.as_bytes(), &self.endpoint).await?;
        trace!("flushed metrics datagram to {}", self.endpoint);
        Ok(())
    }
}

/// Build a sender for a protocol name, as configured.
pub fn metrics_sender(
    protocol: &str,
    endpoint: &str,
) -> Result<Box<dyn MetricsSender>, GrebeError> {
    match MetricsProtocol::from_str(protocol) {
        Ok(MetricsProtocol::Http) => Ok(Box::new(HttpMetricsSender::new(endpoint))),
        Ok(MetricsProtocol::Udp) => Ok(Box::new(UdpMetricsSender::new(endpoint))),
        Err(_) => Err(GrebeError::InvalidOption {
            option: "`metrics protocol`".to_string(),
            value: protocol.to_string(),
            detail: "metrics protocol must be `http` or `udp`.".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_escaping() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
        assert_eq!(escape_tag("plain"), "plain");
        assert_eq!(escape_tag("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn field_text_escaping() {
        assert_eq!(escape_field_text("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_field_text("a\\b"), "a\\\\b");
    }

    #[test]
    fn line_assembly() {
        let line = format_line(
            "samples",
            &[("label", "home page"), ("status", "200")],
            &[
                ("elapsed", FieldValue::Integer(123)),
                ("success", FieldValue::Boolean(true)),
                ("message", FieldValue::Text("OK".to_string())),
                ("ratio", FieldValue::Float(0.5)),
            ],
            Some(1_690_000_000_000_000_000),
        );
        assert_eq!(
            line,
            "samples,label=home\\ page,status=200 \
             elapsed=123i,success=true,message=\"OK\",ratio=0.5 \
             1690000000000000000"
        );
    }

    #[test]
    fn line_without_timestamp_or_tags() {
        let line = format_line("s", &[], &[("v", FieldValue::Integer(1))], None);
        assert_eq!(line, "s v=1i");
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!(MetricsProtocol::from_str("http"), Ok(MetricsProtocol::Http));
        assert_eq!(MetricsProtocol::from_str("HTTP"), Ok(MetricsProtocol::Http));
        assert_eq!(MetricsProtocol::from_str("udp"), Ok(MetricsProtocol::Udp));
        assert!(MetricsProtocol::from_str("carrier-pigeon").is_err());
        assert!(metrics_sender("carrier-pigeon", "x").is_err());
    }

    #[test]
    fn senders_buffer_until_flush() {
        let mut sender = HttpMetricsSender::new("http://localhost:8086/write");
        assert_eq!(sender.buffered(), 0);
        sender.add_metric("s v=1i".to_string());
        sender.add_metric("s v=2i".to_string());
        assert_eq!(sender.buffered(), 2);
    }
}

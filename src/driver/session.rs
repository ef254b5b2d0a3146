//! Line-oriented decision session.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::ratelimit::{Decision, RateLimitService};

/// One decision as written to the output stream.
#[derive(Debug, Serialize)]
pub struct DecisionRecord<'a> {
    pub key: &'a str,
    pub allowed: bool,
    pub remaining: u64,
    /// Tells readers whether `remaining` counts tokens or window slots
    pub algorithm: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl<'a> DecisionRecord<'a> {
    /// Build a record for `key` from the service's decision.
    pub fn new(key: &'a str, service: &RateLimitService, decision: &Decision) -> Self {
        Self {
            key,
            allowed: decision.allowed,
            remaining: decision.remaining,
            algorithm: service.algorithm().as_str(),
            // Round up so a client sleeping this long is not denied again.
            retry_after_ms: decision
                .retry_after
                .map(|d| u64::try_from(d.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)),
        }
    }
}

/// Read keys one per line from `reader` and write one JSON decision per line
/// to `writer`, until `reader` reaches end of input.
///
/// Each line is taken verbatim as the key (a trailing `\r` is dropped), so a
/// blank line checks the empty key. Returns the number of decisions written.
#[instrument(skip_all, fields(algorithm = %service.algorithm()))]
pub async fn run<R, W>(service: &RateLimitService, reader: R, mut writer: W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut decisions = 0u64;

    while let Some(line) = lines.next_line().await? {
        let key = line.strip_suffix('\r').unwrap_or(&line);
        let decision = service.check_limit(key);

        let mut out = serde_json::to_vec(&DecisionRecord::new(key, service, &decision))?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;

        decisions += 1;
    }

    debug!(decisions = decisions, "Input exhausted");
    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterSettings;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::BufReader;

    fn service(settings: LimiterSettings) -> RateLimitService {
        RateLimitService::with_clock(&settings, Arc::new(ManualClock::new())).unwrap()
    }

    fn parse_lines(output: &[u8]) -> Vec<serde_json::Value> {
        std::str::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_decision_per_line() {
        let service = service(LimiterSettings::token_bucket(2, 1));
        let mut output = Vec::new();

        let count = run(&service, &b"alice\nalice\nalice\nbob\n"[..], &mut output)
            .await
            .unwrap();

        assert_eq!(count, 4);
        let records = parse_lines(&output);
        let allowed: Vec<bool> = records.iter().map(|r| r["allowed"].as_bool().unwrap()).collect();
        assert_eq!(allowed, vec![true, true, false, true]);
        assert_eq!(records[0]["remaining"], 1);
        assert_eq!(records[2]["retry_after_ms"], 1000);
        assert_eq!(records[3]["key"], "bob");
        assert!(records[0].get("retry_after_ms").is_none());
    }

    #[tokio::test]
    async fn test_sliding_window_records_name_algorithm() {
        let service = service(LimiterSettings::sliding_window(Duration::from_secs(10), 3));
        let mut output = Vec::new();

        run(&service, &b"k\r\n"[..], &mut output).await.unwrap();

        let records = parse_lines(&output);
        assert_eq!(records[0]["key"], "k");
        assert_eq!(records[0]["algorithm"], "slidingwindow");
        assert_eq!(records[0]["remaining"], 2);
    }

    #[tokio::test]
    async fn test_blank_line_is_empty_key() {
        let service = service(LimiterSettings::token_bucket(1, 1));
        let mut output = Vec::new();

        run(&service, &b"\n\n"[..], &mut output).await.unwrap();

        let records = parse_lines(&output);
        assert_eq!(records[0]["key"], "");
        assert_eq!(records[0]["allowed"], true);
        assert_eq!(records[1]["allowed"], false);
    }

    #[tokio::test]
    async fn test_exact_wire_format() {
        let service = service(LimiterSettings::token_bucket(1, 1));

        let reader = tokio_test::io::Builder::new()
            .read(b"carol\n")
            .read(b"carol\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"key\":\"carol\",\"allowed\":true,\"remaining\":0,\"algorithm\":\"tokenbucket\"}\n")
            .write(b"{\"key\":\"carol\",\"allowed\":false,\"remaining\":0,\"algorithm\":\"tokenbucket\",\"retry_after_ms\":1000}\n")
            .build();

        let count = run(&service, BufReader::new(reader), writer).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let service = service(LimiterSettings::token_bucket(1, 1));
        let mut output = Vec::new();

        assert_eq!(run(&service, &b""[..], &mut output).await.unwrap(), 0);
        assert!(output.is_empty());
    }
}

//! Interaction counting against relays.
//!
//! A count query tries each strategy in order and takes the first success.
//! `Server` asks the relays for a NIP-45 count and transfers no event
//! bodies. `Manual` opens a short subscription and tallies what arrives until
//! end-of-stored-events or the timeout, whichever comes first; a timeout
//! yields the partial tally rather than an error.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use mynostrspace_nostr::{EventRecord, EventSource, Filter, NostrError, RelayMessage, kinds};

/// How to obtain a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountStrategy {
    /// Relay-side count capability.
    Server,
    /// Subscribe and tally locally.
    Manual,
}

/// Which interaction a count query measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Likes,
    Comments,
    Reposts,
    Zaps,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Likes,
        Metric::Comments,
        Metric::Reposts,
        Metric::Zaps,
    ];

    /// Filter selecting interactions of this type aimed at `event_id`.
    pub fn filter(self, event_id: &str) -> Filter {
        let wanted: &[u32] = match self {
            Metric::Likes => &[kinds::REACTION],
            Metric::Comments => &[kinds::TEXT_NOTE],
            Metric::Reposts => &[kinds::REPOST, kinds::GENERIC_REPOST],
            Metric::Zaps => &[kinds::ZAP_RECEIPT],
        };
        Filter::new()
            .kinds(wanted.iter().copied())
            .event_refs([event_id])
    }

    /// Strategies to try, in order.
    ///
    /// Zap totals are sums over receipt bodies, so a bare server count is
    /// useless for them.
    pub fn strategies(self) -> &'static [CountStrategy] {
        match self {
            Metric::Zaps => &[CountStrategy::Manual],
            _ => &[CountStrategy::Server, CountStrategy::Manual],
        }
    }
}

/// Result of a count query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub events: u64,
    /// Sum of zap amounts in sats. Only populated by manual counts.
    pub sats: u64,
}

/// Run `strategies` in order, returning the first success.
///
/// When every strategy fails, the error lists each failure.
pub async fn count_with_strategies(
    source: &dyn EventSource,
    filter: &Filter,
    strategies: &[CountStrategy],
    manual_timeout: Duration,
) -> Result<Tally, NostrError> {
    let mut failures = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let attempt = match strategy {
            CountStrategy::Server => source.count(filter).await.map(|events| Tally {
                events,
                sats: 0,
            }),
            CountStrategy::Manual => manual_count(source, filter, manual_timeout).await,
        };
        match attempt {
            Ok(tally) => return Ok(tally),
            Err(e) => {
                trace!(strategy = ?strategy, error = %e, "count strategy failed");
                failures.push(format!("{:?}: {}", strategy, e));
            }
        }
    }

    Err(NostrError::AllStrategiesFailed(failures))
}

/// Tally matching events from a short-lived subscription.
async fn manual_count(
    source: &dyn EventSource,
    filter: &Filter,
    timeout: Duration,
) -> Result<Tally, NostrError> {
    let mut subscription = source.subscribe(filter.clone()).await?;
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = HashSet::new();
    let mut tally = Tally::default();

    loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(RelayMessage::Event(event))) => {
                if seen.insert(event.id.clone()) {
                    tally.events += 1;
                    if event.kind == kinds::ZAP_RECEIPT {
                        tally.sats += zap_amount_sats(&event).unwrap_or(0);
                    }
                }
            }
            Ok(Some(RelayMessage::EndOfStoredEvents)) | Ok(None) => break,
            Err(_) => {
                debug!(counted = tally.events, "manual count timed out, using partial tally");
                break;
            }
        }
    }

    subscription.stop();
    Ok(tally)
}

#[derive(Deserialize)]
struct ZapRequest {
    #[serde(default)]
    tags: Vec<Vec<String>>,
}

/// Amount of a zap receipt in sats.
///
/// Prefers the `amount` tag (millisats) of the embedded zap request, then
/// falls back to the amount encoded in the `bolt11` invoice.
pub fn zap_amount_sats(receipt: &EventRecord) -> Option<u64> {
    let from_request = receipt
        .first_tag_value("description")
        .and_then(|desc| serde_json::from_str::<ZapRequest>(desc).ok())
        .and_then(|req| {
            req.tags
                .iter()
                .find(|t| t.first().map(String::as_str) == Some("amount"))
                .and_then(|t| t.get(1))
                .and_then(|v| v.parse::<u64>().ok())
        });

    from_request
        .or_else(|| receipt.first_tag_value("bolt11").and_then(bolt11_amount_msats))
        .map(|msats| msats / 1000)
}

/// Amount of a BOLT-11 invoice in millisats, if it carries one.
///
/// The amount sits in the human-readable part: `ln` + currency + digits +
/// optional multiplier (`m`, `u`, `n`, `p`), up to the last `1` separator.
pub fn bolt11_amount_msats(invoice: &str) -> Option<u64> {
    const MSATS_PER_BTC: u64 = 100_000_000_000;

    let invoice = invoice.trim().to_ascii_lowercase();
    let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);
    let hrp = &invoice[..invoice.rfind('1')?];
    let rest = hrp.strip_prefix("ln")?;

    let amount_start = rest.find(|c: char| c.is_ascii_digit())?;
    let amount_part = &rest[amount_start..];
    let digits_end = amount_part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(amount_part.len());
    let amount: u64 = amount_part[..digits_end].parse().ok()?;

    match &amount_part[digits_end..] {
        "" => amount.checked_mul(MSATS_PER_BTC),
        "m" => amount.checked_mul(MSATS_PER_BTC / 1_000),
        "u" => amount.checked_mul(MSATS_PER_BTC / 1_000_000),
        "n" => amount.checked_mul(MSATS_PER_BTC / 1_000_000_000),
        "p" => Some(amount / 10),
        _ => None,
    }
}

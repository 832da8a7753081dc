//! Candidate enumeration and `GET /shelly` probing

use std::net::Ipv4Addr;
use std::time::Duration;

use domain::DomainError;
use domain::error::Result;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Deserialize;
use tracing::{debug, info};

/// Upper bound on hosts enumerated from one range or network
pub const MAX_CANDIDATES: usize = 4096;

#[derive(Debug, Deserialize)]
struct ProbeBody {
    #[serde(rename = "gen", default)]
    generation: u8,
    #[serde(default)]
    id: Option<String>,
}

fn range_hosts(start: &str, end: &str) -> Result<Vec<String>> {
    let start: Ipv4Addr = start
        .trim()
        .parse()
        .map_err(|e| DomainError::InvalidDriverConfig(format!("ip_start {:?}: {}", start, e)))?;
    let end: Ipv4Addr = end
        .trim()
        .parse()
        .map_err(|e| DomainError::InvalidDriverConfig(format!("ip_end {:?}: {}", end, e)))?;

    let (low, high) = {
        let (a, b) = (u32::from(start), u32::from(end));
        (a.min(b), a.max(b))
    };
    let count = (high - low) as usize + 1;
    if count > MAX_CANDIDATES {
        return Err(DomainError::InvalidDriverConfig(format!(
            "range {}..={} has {} hosts, limit is {}",
            start, end, count, MAX_CANDIDATES
        )));
    }
    Ok((low..=high).map(|ip| Ipv4Addr::from(ip).to_string()).collect())
}

fn cidr_hosts(cidr: &str) -> Result<Vec<String>> {
    let invalid = |reason: String| DomainError::InvalidDriverConfig(format!("ip_cidr {:?}: {}", cidr, reason));

    let (addr, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length".to_string()))?;
    let addr: Ipv4Addr = addr.parse().map_err(|e| invalid(format!("{}", e)))?;
    let prefix: u32 = prefix.parse().map_err(|e| invalid(format!("{}", e)))?;
    if prefix > 32 {
        return Err(invalid("prefix length above 32".to_string()));
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;
    let (first, last) = if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };

    let count = (last - first) as usize + 1;
    if count > MAX_CANDIDATES {
        return Err(invalid(format!("{} hosts, limit is {}", count, MAX_CANDIDATES)));
    }
    Ok((first..=last).map(|ip| Ipv4Addr::from(ip).to_string()).collect())
}

/// Hosts to probe, in probe order and without duplicates.
///
/// The start/end range wins when both ends parse, otherwise the CIDR block is
/// used. Explicit hosts are appended. Failing to enumerate anything is an
/// error only when no explicit host is configured.
pub fn candidate_hosts(
    ip_start: Option<&str>,
    ip_end: Option<&str>,
    ip_cidr: Option<&str>,
    hosts: &[String],
) -> Result<Vec<String>> {
    let range = match (ip_start, ip_end) {
        (Some(start), Some(end)) => range_hosts(start, end),
        _ => Err(DomainError::InvalidDriverConfig(
            "ip_start and ip_end not both set".to_string(),
        )),
    };

    let enumerated = match range {
        Ok(hosts) => Ok(hosts),
        Err(range_err) => match ip_cidr {
            Some(cidr) => cidr_hosts(cidr).map_err(|cidr_err| {
                DomainError::Multiple(vec![range_err, cidr_err])
            }),
            None => Err(DomainError::Multiple(vec![
                range_err,
                DomainError::InvalidDriverConfig("ip_cidr not set".to_string()),
            ])),
        },
    };

    let mut candidates = match enumerated {
        Ok(candidates) => candidates,
        Err(e) if hosts.is_empty() => return Err(e.context("no discovery candidates")),
        Err(e) => {
            debug!(error = %e, "No address range configured, using explicit hosts");
            Vec::new()
        }
    };

    for host in hosts {
        let host = host.trim();
        if !host.is_empty() && !candidates.iter().any(|c| c == host) {
            candidates.push(host.to_string());
        }
    }
    Ok(candidates)
}

/// `GET http://{host}/shelly`; true only for a second generation device
pub async fn probe(client: &reqwest::Client, host: &str) -> bool {
    let response = match client.get(format!("http://{}/shelly", host)).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(host, status = %response.status(), "Probe rejected");
            return false;
        }
        Err(e) => {
            debug!(host, error = %e, "Probe failed");
            return false;
        }
    };
    match response.json::<ProbeBody>().await {
        Ok(body) if body.generation == 2 => {
            debug!(host, id = ?body.id, "Probe matched");
            true
        }
        Ok(body) => {
            debug!(host, generation = body.generation, "Probe skipped unsupported generation");
            false
        }
        Err(e) => {
            debug!(host, error = %e, "Probe returned unexpected body");
            false
        }
    }
}

/// Probe all candidates with bounded concurrency, keeping candidate order
pub async fn probe_all(hosts: &[String], timeout: Duration, concurrency: usize) -> Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| DomainError::DriverError(format!("failed to build probe client: {}", e)))?;

    let mut found: Vec<(usize, String)> = stream::iter(hosts.iter().cloned().enumerate())
        .map(|(index, host)| {
            let client = client.clone();
            async move { probe(&client, &host).await.then_some((index, host)) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();
    found.sort_by_key(|(index, _)| *index);

    info!(candidates = hosts.len(), found = found.len(), "Probe pass finished");
    Ok(found.into_iter().map(|(_, host)| host).collect())
}

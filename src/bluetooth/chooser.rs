// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! User-mediated device selection.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

use super::PeerDescriptor;

/// Picks one of the discovered candidates, or declines.
#[async_trait]
pub trait DeviceChooser: Send + Sync {
    /// Index into `candidates`, `None` to cancel.
    async fn choose(&self, candidates: &[PeerDescriptor]) -> Option<usize>;
}

/// Non-interactive: takes the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstMatch;

#[async_trait]
impl DeviceChooser for FirstMatch {
    async fn choose(&self, candidates: &[PeerDescriptor]) -> Option<usize> {
        (!candidates.is_empty()).then_some(0)
    }
}

/// Lists candidates on stderr and reads a number from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl DeviceChooser for TerminalPrompt {
    async fn choose(&self, candidates: &[PeerDescriptor]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let listing = render_candidates(candidates);
        let count = candidates.len();

        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr().lock();
            write!(stderr, "{}Select a device [1-{}, q to cancel]: ", listing, count)?;
            stderr.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => {
                let choice = parse_selection(&line, count);
                debug!("Chooser input {:?} -> {:?}", line.trim(), choice);
                choice
            }
            Ok(Err(e)) => {
                warn!("Failed to read device selection: {}", e);
                None
            }
            Err(e) => {
                warn!("Device selection prompt aborted: {}", e);
                None
            }
        }
    }
}

fn render_candidates(candidates: &[PeerDescriptor]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, peer)| format!("  {}) {} [{}]\n", i + 1, peer.display_name(), peer.id))
        .collect()
}

/// 1-based selection. Blank input, `q` or anything out of range cancels.
fn parse_selection(input: &str, count: usize) -> Option<usize> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("q") {
        return None;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}

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

//! Caller-side balance bookkeeping.

use tracing::info;

use super::TransactionOutcome;

/// Balance held by the point-of-sale client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wallet {
    balance: f64,
}

impl Wallet {
    pub fn new(balance: f64) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn can_afford(&self, amount: f64) -> bool {
        self.balance >= amount
    }

    /// Debit a confirmed transaction, never going below zero. Failed
    /// outcomes leave the balance untouched.
    pub fn apply(&mut self, outcome: &TransactionOutcome) -> f64 {
        if outcome.success {
            self.balance = (self.balance - outcome.amount).max(0.0);
            info!(
                "Debited {} for {}, balance now {}",
                outcome.amount, outcome.name, self.balance
            );
        }
        self.balance
    }
}

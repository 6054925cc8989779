//! Shared `Invoice` aggregate fixture.
//!
//! Small enough to reason about in assertions, rich enough to exercise
//! the full lifecycle: creation, updates guarded by business rules, and
//! soft deletion (deletion is an ordinary event; nothing is ever removed
//! from the log).

use serde::{Deserialize, Serialize};
use stela_aggregate::state::AggregateState;
use stela_core::event::Event;
use stela_core::stream::AggregateId;
use thiserror::Error;

/// Invoice state for tests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Whether `Created` has been applied.
    pub created: bool,
    /// Current amount in cents.
    pub amount: i64,
    /// Soft-delete marker.
    pub deleted: bool,
}

/// Commands accepted by the invoice fixture.
#[derive(Clone, Debug)]
pub enum InvoiceCommand {
    /// Create the invoice with an initial amount.
    Create {
        /// Initial amount in cents.
        amount: i64,
    },
    /// Replace the amount.
    UpdateAmount {
        /// New amount in cents.
        amount: i64,
    },
    /// Soft-delete the invoice.
    Delete,
}

/// Events emitted by the invoice fixture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    /// The invoice came into existence.
    Created {
        /// Initial amount in cents.
        amount: i64,
    },
    /// The amount changed.
    AmountUpdated {
        /// New amount in cents.
        amount: i64,
    },
    /// The invoice was soft-deleted.
    Deleted,
}

impl Event for InvoiceEvent {
    fn event_kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "Invoice.Created.v1",
            Self::AmountUpdated { .. } => "Invoice.AmountUpdated.v1",
            Self::Deleted => "Invoice.Deleted.v1",
        }
    }
}

/// Business-rule violations of the invoice fixture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    /// `Create` on an invoice that already exists.
    #[error("invoice already exists")]
    AlreadyExists,

    /// A mutation on an invoice that was never created.
    #[error("invoice does not exist")]
    NotFound,

    /// A mutation on a soft-deleted invoice.
    #[error("invoice is deleted")]
    Deleted,

    /// A non-positive amount.
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
}

impl AggregateState for Invoice {
    const KIND: &'static str = "invoice";
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = InvoiceError;

    fn new(_id: &AggregateId) -> Self {
        Self::default()
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Create { amount } => {
                if self.created {
                    return Err(InvoiceError::AlreadyExists);
                }
                if *amount <= 0 {
                    return Err(InvoiceError::InvalidAmount(*amount));
                }
                Ok(vec![InvoiceEvent::Created { amount: *amount }])
            }
            InvoiceCommand::UpdateAmount { amount } => {
                if !self.created {
                    return Err(InvoiceError::NotFound);
                }
                if self.deleted {
                    return Err(InvoiceError::Deleted);
                }
                if *amount <= 0 {
                    return Err(InvoiceError::InvalidAmount(*amount));
                }
                Ok(vec![InvoiceEvent::AmountUpdated { amount: *amount }])
            }
            InvoiceCommand::Delete => {
                if !self.created {
                    return Err(InvoiceError::NotFound);
                }
                if self.deleted {
                    return Err(InvoiceError::Deleted);
                }
                Ok(vec![InvoiceEvent::Deleted])
            }
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Created { amount } => {
                self.created = true;
                self.amount = *amount;
            }
            InvoiceEvent::AmountUpdated { amount } => self.amount = *amount,
            InvoiceEvent::Deleted => self.deleted = true,
        }
    }

    fn event_kinds() -> &'static [&'static str] {
        &[
            "Invoice.Created.v1",
            "Invoice.AmountUpdated.v1",
            "Invoice.Deleted.v1",
        ]
    }
}

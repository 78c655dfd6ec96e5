//! Domain jobs and the queues they run on.

use job_queue::{JobOptions, JobPayload};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumDiscriminants, EnumIter};

/// The three queues a coordinator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum QueueName {
    Default,
    Notifications,
    Reminders,
}

/// Tell a vendor about a new or updated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorNotification {
    pub request_id: String,
    pub vendor_id: String,
    pub title: String,
    pub message: String,
}

/// Nudge a vendor who has not answered a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseReminder {
    pub request_id: String,
    pub vendor_id: String,
    pub client_id: String,
}

/// Offer a client other vendors after one declined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeVendorRecommendation {
    pub request_id: String,
    pub client_id: String,
    pub declined_vendor_id: String,
    pub alternative_vendor_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(CoordinationJobKind), derive(Hash, Display, EnumIter))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationJob {
    VendorNotification(VendorNotification),
    ResponseReminder(ResponseReminder),
    AlternativeVendorRecommendation(AlternativeVendorRecommendation),
    InvalidateCacheTags { tags: Vec<String> },
}

impl JobPayload for CoordinationJob {
    type Kind = CoordinationJobKind;

    fn kind(&self) -> CoordinationJobKind {
        self.into()
    }
}

impl CoordinationJobKind {
    /// Queue this kind is enqueued on and handled by
    pub fn queue(self) -> QueueName {
        match self {
            Self::VendorNotification | Self::AlternativeVendorRecommendation => {
                QueueName::Notifications
            }
            Self::ResponseReminder => QueueName::Reminders,
            Self::InvalidateCacheTags => QueueName::Default,
        }
    }

    pub fn priority(self) -> i32 {
        match self {
            Self::VendorNotification => 10,
            Self::AlternativeVendorRecommendation => 8,
            Self::ResponseReminder => 5,
            Self::InvalidateCacheTags => 0,
        }
    }

    /// Options carrying this kind's fixed priority
    pub fn options(self) -> JobOptions {
        JobOptions::new().with_priority(self.priority())
    }
}

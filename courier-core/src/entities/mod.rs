pub mod dispatch_unit;
pub mod idempotency_record;

use courier_sdk::objects::{
    Channel as SdkChannel, DispatchStatus as SdkDispatchStatus, UnitKind as SdkUnitKind,
};

/// Dispatch unit status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see
/// `courier_sdk::objects::DispatchStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "dispatch_status")]
pub enum DispatchStatus {
    Queued,
    Dispatched,
    Sent,
    Failed,
    Skipped,
    Done,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        SdkDispatchStatus::from(self).is_terminal()
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SdkDispatchStatus::from(*self))
    }
}

impl From<DispatchStatus> for SdkDispatchStatus {
    fn from(value: DispatchStatus) -> Self {
        match value {
            DispatchStatus::Queued => SdkDispatchStatus::Queued,
            DispatchStatus::Dispatched => SdkDispatchStatus::Dispatched,
            DispatchStatus::Sent => SdkDispatchStatus::Sent,
            DispatchStatus::Failed => SdkDispatchStatus::Failed,
            DispatchStatus::Skipped => SdkDispatchStatus::Skipped,
            DispatchStatus::Done => SdkDispatchStatus::Done,
        }
    }
}

impl From<SdkDispatchStatus> for DispatchStatus {
    fn from(value: SdkDispatchStatus) -> Self {
        match value {
            SdkDispatchStatus::Queued => DispatchStatus::Queued,
            SdkDispatchStatus::Dispatched => DispatchStatus::Dispatched,
            SdkDispatchStatus::Sent => DispatchStatus::Sent,
            SdkDispatchStatus::Failed => DispatchStatus::Failed,
            SdkDispatchStatus::Skipped => DispatchStatus::Skipped,
            SdkDispatchStatus::Done => DispatchStatus::Done,
        }
    }
}

/// Unit kind for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "unit_kind")]
pub enum UnitKind {
    Message,
    Job,
}

impl From<UnitKind> for SdkUnitKind {
    fn from(value: UnitKind) -> Self {
        match value {
            UnitKind::Message => SdkUnitKind::Message,
            UnitKind::Job => SdkUnitKind::Job,
        }
    }
}

impl From<SdkUnitKind> for UnitKind {
    fn from(value: SdkUnitKind) -> Self {
        match value {
            SdkUnitKind::Message => UnitKind::Message,
            SdkUnitKind::Job => UnitKind::Job,
        }
    }
}

/// Delivery channel for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "dispatch_channel")]
pub enum DispatchChannel {
    Whatsapp,
    Email,
    Sms,
}

impl From<DispatchChannel> for SdkChannel {
    fn from(value: DispatchChannel) -> Self {
        match value {
            DispatchChannel::Whatsapp => SdkChannel::Whatsapp,
            DispatchChannel::Email => SdkChannel::Email,
            DispatchChannel::Sms => SdkChannel::Sms,
        }
    }
}

impl From<SdkChannel> for DispatchChannel {
    fn from(value: SdkChannel) -> Self {
        match value {
            SdkChannel::Whatsapp => DispatchChannel::Whatsapp,
            SdkChannel::Email => DispatchChannel::Email,
            SdkChannel::Sms => DispatchChannel::Sms,
        }
    }
}

//! Cache keys, their TTLs, and which keys each mutation makes stale.
//!
//! Every write path describes itself as a [`Mutation`]; [`Mutation::invalidations`]
//! is the only place that knows which derived entries depend on which entities.

use std::time::Duration;

/// Purpose of a one-time code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    PasswordReset,
    PinReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::PasswordReset => "password",
            OtpPurpose::PinReset => "pin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// Owner-facing profile (includes balance)
    UserProfile(String),
    /// One page of a user's ledger
    TransactionPage { user_id: String, page: u32, limit: u32 },
    /// Sent and received payment requests
    Requests(String),
    /// Scan-to-pay payload
    QrCode(String),
    /// One-time code keyed by purpose and email
    Otp { purpose: OtpPurpose, email: String },
    /// Email verification token digest -> user id
    EmailVerification(String),
}

impl CacheKey {
    pub fn render(&self) -> String {
        match self {
            CacheKey::UserProfile(id) => format!("user:{}", id),
            CacheKey::TransactionPage { user_id, page, limit } => {
                format!("transactions:{}:{}:{}", user_id, page, limit)
            }
            CacheKey::Requests(id) => format!("requests:{}", id),
            CacheKey::QrCode(id) => format!("qr:{}", id),
            CacheKey::Otp { purpose, email } => {
                format!("otp:{}:{}", purpose.as_str(), email.to_lowercase())
            }
            CacheKey::EmailVerification(digest) => format!("verify:{}", digest),
        }
    }

    pub fn ttl(&self) -> Duration {
        let secs = match self {
            CacheKey::UserProfile(_) => 1800,
            CacheKey::TransactionPage { .. } => 900,
            CacheKey::Requests(_) => 300,
            CacheKey::QrCode(_) => 7200,
            CacheKey::Otp { .. } => 600,
            CacheKey::EmailVerification(_) => 86_400,
        };
        Duration::from_secs(secs)
    }
}

/// A single entry or every entry matching a glob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    Pattern(String),
}

impl Invalidation {
    fn key(key: CacheKey) -> Self {
        Invalidation::Key(key.render())
    }

    fn transaction_pages(user_id: &str) -> Self {
        Invalidation::Pattern(format!("transactions:{}:*", user_id))
    }
}

/// A committed write to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Transfer { sender_id: String, receiver_id: String },
    Deposit { user_id: String },
    DepositSettled { user_id: String },
    RequestCreated { sender_id: String, receiver_id: String },
    RequestAccepted { sender_id: String, receiver_id: String },
    RequestRejected { sender_id: String, receiver_id: String },
    ProfileUpdated { user_id: String },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Transfer { .. } => "transfer",
            Mutation::Deposit { .. } => "deposit",
            Mutation::DepositSettled { .. } => "deposit_settled",
            Mutation::RequestCreated { .. } => "request_created",
            Mutation::RequestAccepted { .. } => "request_accepted",
            Mutation::RequestRejected { .. } => "request_rejected",
            Mutation::ProfileUpdated { .. } => "profile_updated",
        }
    }

    /// Entries made stale by this mutation
    pub fn invalidations(&self) -> Vec<Invalidation> {
        match self {
            Mutation::Transfer { sender_id, receiver_id } => {
                let mut out = Vec::new();
                for id in [sender_id, receiver_id] {
                    out.push(Invalidation::key(CacheKey::UserProfile(id.clone())));
                    out.push(Invalidation::transaction_pages(id));
                }
                out
            }
            Mutation::Deposit { user_id } | Mutation::DepositSettled { user_id } => vec![
                Invalidation::key(CacheKey::UserProfile(user_id.clone())),
                Invalidation::transaction_pages(user_id),
            ],
            Mutation::RequestCreated { sender_id, receiver_id }
            | Mutation::RequestRejected { sender_id, receiver_id } => vec![
                Invalidation::key(CacheKey::Requests(sender_id.clone())),
                Invalidation::key(CacheKey::Requests(receiver_id.clone())),
            ],
            Mutation::RequestAccepted { sender_id, receiver_id } => {
                let mut out = Vec::new();
                for id in [sender_id, receiver_id] {
                    out.push(Invalidation::key(CacheKey::UserProfile(id.clone())));
                    out.push(Invalidation::transaction_pages(id));
                    out.push(Invalidation::key(CacheKey::Requests(id.clone())));
                }
                out
            }
            // Names appear in the QR payload and in counterpart views
            Mutation::ProfileUpdated { user_id } => vec![
                Invalidation::key(CacheKey::UserProfile(user_id.clone())),
                Invalidation::key(CacheKey::QrCode(user_id.clone())),
                Invalidation::key(CacheKey::Requests(user_id.clone())),
                Invalidation::transaction_pages(user_id),
            ],
        }
    }
}

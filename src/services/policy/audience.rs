//! Audience scoping: which client context a header or CSP directive applies to.

use serde::Serialize;

/// The context of the request currently being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientContext {
    Front,
    Admin,
}

impl ClientContext {
    /// Requests under `admin_prefix` are administrative; everything else is front-end.
    ///
    /// The prefix must match a whole path segment, so `/administrator-x` stays front-end.
    pub fn from_path(path: &str, admin_prefix: &str) -> Self {
        let prefix = admin_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Self::Front;
        }

        match path.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Self::Admin,
            _ => Self::Front,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match Audience::parse(raw)? {
            Audience::Front => Some(Self::Front),
            Audience::Admin => Some(Self::Admin),
            Audience::Both => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "site",
            Self::Admin => "administrator",
        }
    }
}

/// Who a configured entry is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Front,
    Admin,
    Both,
}

impl From<ClientContext> for Audience {
    fn from(ctx: ClientContext) -> Self {
        match ctx {
            ClientContext::Front => Self::Front,
            ClientContext::Admin => Self::Admin,
        }
    }
}

impl Audience {
    /// Parse the audience strings used by the configuration store.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "site" | "front" => Some(Self::Front),
            "administrator" | "admin" => Some(Self::Admin),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "site",
            Self::Admin => "administrator",
            Self::Both => "both",
        }
    }

    pub fn matches(&self, ctx: ClientContext) -> bool {
        match self {
            Self::Both => true,
            Self::Front => ctx == ClientContext::Front,
            Self::Admin => ctx == ClientContext::Admin,
        }
    }
}

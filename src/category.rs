//! Request categories and the static routing table
//!
//! Routing is a closed mapping decided at startup: each [`Category`] maps to
//! one handler id, and a single designated fallback handler covers every
//! category without an explicit route. The table is immutable once built and
//! can be shared freely across concurrent sessions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The closed set of triage categories a request can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Billing,
    Technical,
    General,
    Escalation,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 4] = [
        Category::Billing,
        Category::Technical,
        Category::General,
        Category::Escalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Billing => "billing",
            Category::Technical => "technical",
            Category::General => "general",
            Category::Escalation => "escalation",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static category → handler-id routing table with a designated fallback.
///
/// Built once at startup via the builder-style [`route`](Self::route) calls;
/// read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    routes: HashMap<Category, String>,
    fallback: String,
}

impl RoutingTable {
    /// Creates a table where every category resolves to `fallback`.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: fallback.into(),
        }
    }

    /// Adds a route for `category`.
    pub fn route(mut self, category: Category, handler_id: impl Into<String>) -> Self {
        self.routes.insert(category, handler_id.into());
        self
    }

    /// Resolves the handler id for `category`, falling back when unrouted.
    pub fn handler_for(&self, category: Category) -> &str {
        self.routes
            .get(&category)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    /// The designated fallback handler id.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Whether `category` has an explicit route.
    pub fn is_routed(&self, category: Category) -> bool {
        self.routes.contains_key(&category)
    }
}

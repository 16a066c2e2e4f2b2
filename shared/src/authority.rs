//! Authority resolution: an ordered, cached set of predicate rules
//!
//! Rules are evaluated from highest to lowest priority. The first enabled
//! rule whose predicate returns `true` grants authority; if none does,
//! authority is denied. A predicate that fails counts as not matching.
//!
//! Results are cached per (type, environment, network id, client id) for
//! `cache_timeout_ms`. Any change to the rule set drops the whole cache.

use crate::clock::Clock;
use crate::component::SyncTarget;
use crate::config::Environment;
use crate::error::AuthorityError;
use crate::registry::FieldDeclaration;
use log::{debug, warn};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const SERVER_RULE: &str = "server_authority";
pub const OWNER_RULE: &str = "owner_authority";
pub const COMPONENT_RULE: &str = "component_check";
pub const ENTITY_OWNER_RULE: &str = "entity_owner";

pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 5_000;

/// How much say the local process has over an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthorityLevel {
    None,
    Owner,
    Full,
}

/// Inputs available to authority predicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityContext {
    pub environment: Environment,
    pub network_id: Option<String>,
    pub entity_id: Option<String>,
    pub client_id: Option<String>,
    pub level: AuthorityLevel,
    pub timestamp_ms: u64,
}

pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

pub type AuthorityPredicate =
    Arc<dyn Fn(&dyn SyncTarget, &AuthorityContext) -> Result<bool, PredicateError> + Send + Sync>;

#[derive(Clone)]
pub struct AuthorityRule {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub predicate: AuthorityPredicate,
}

impl AuthorityRule {
    pub fn new<F>(name: impl Into<String>, priority: i32, predicate: F) -> Self
    where
        F: Fn(&dyn SyncTarget, &AuthorityContext) -> Result<bool, PredicateError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for AuthorityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Result of one authority evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityDecision {
    pub granted: bool,
    /// The matching rule, or `None` for default deny
    pub rule: Option<String>,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_name: &'static str,
    environment: Environment,
    network_id: String,
    client_id: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    granted: bool,
    rule: Option<String>,
    at_ms: u64,
}

pub struct AuthorityEngine {
    environment: Environment,
    local_client_id: Option<String>,
    rules: Vec<AuthorityRule>,
    cache: HashMap<CacheKey, CacheEntry>,
    cache_timeout_ms: u64,
    clock: Arc<dyn Clock>,
}

impl AuthorityEngine {
    /// Creates an engine with no rules; every query is denied until rules
    /// are added.
    pub fn new(environment: Environment, clock: Arc<dyn Clock>) -> Self {
        Self {
            environment,
            local_client_id: None,
            rules: Vec::new(),
            cache: HashMap::new(),
            cache_timeout_ms: DEFAULT_CACHE_TIMEOUT_MS,
            clock,
        }
    }

    /// Creates an engine with the default rule set installed, highest
    /// priority first
    pub fn with_default_rules(environment: Environment, clock: Arc<dyn Clock>) -> Self {
        let mut engine = Self::new(environment, clock);
        engine.rules = default_rules();
        engine.rules.sort_by_key(|rule| Reverse(rule.priority));
        engine
    }

    /// Process role the rules are evaluated for
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Switches the process role and drops every cached decision
    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
        self.clear_cache();
    }

    /// Client id used when a query does not name one
    pub fn local_client_id(&self) -> Option<&str> {
        self.local_client_id.as_deref()
    }

    /// Sets the default client id for queries.
    ///
    /// Cached decisions are dropped.
    pub fn set_local_client_id(&mut self, client_id: Option<String>) {
        self.local_client_id = client_id;
        self.clear_cache();
    }

    /// How long a decision stays cached. Zero disables caching.
    pub fn set_cache_timeout_ms(&mut self, timeout_ms: u64) {
        self.cache_timeout_ms = timeout_ms;
        self.clear_cache();
    }

    /// Installed rules in evaluation order, highest priority first
    pub fn rules(&self) -> &[AuthorityRule] {
        &self.rules
    }

    /// Inserts a rule, keeping the list sorted by descending priority.
    /// Rules of equal priority keep insertion order.
    pub fn add_rule(&mut self, rule: AuthorityRule) -> Result<(), AuthorityError> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(AuthorityError::DuplicateRule(rule.name));
        }
        let position = self
            .rules
            .iter()
            .position(|r| r.priority < rule.priority)
            .unwrap_or(self.rules.len());
        self.rules.insert(position, rule);
        self.clear_cache();
        Ok(())
    }

    /// Removes a rule by name and returns it.
    ///
    /// Fails with [`AuthorityError::UnknownRule`] if no rule has that name.
    pub fn remove_rule(&mut self, name: &str) -> Result<AuthorityRule, AuthorityError> {
        let position = self
            .rules
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| AuthorityError::UnknownRule(name.to_string()))?;
        let rule = self.rules.remove(position);
        self.clear_cache();
        Ok(rule)
    }

    /// Enables or disables a rule without changing its position
    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> Result<(), AuthorityError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| AuthorityError::UnknownRule(name.to_string()))?;
        rule.enabled = enabled;
        self.clear_cache();
        Ok(())
    }

    /// Forgets every cached decision
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of decisions currently cached, expired ones included
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Whether the local process may mutate and sync `target`.
    ///
    /// `client_id` overrides the engine's local client id for this query.
    pub fn has_authority(&mut self, target: &dyn SyncTarget, client_id: Option<&str>) -> bool {
        self.evaluate(target, client_id).granted
    }

    /// Resolves authority for `target`, serving from the cache when fresh.
    ///
    /// The decision names the rule that granted, if any.
    pub fn evaluate(&mut self, target: &dyn SyncTarget, client_id: Option<&str>) -> AuthorityDecision {
        let now = self.clock.now_ms();
        let context = self.build_context(target, client_id, now);

        let key = CacheKey {
            type_name: target.component().type_name(),
            environment: context.environment,
            network_id: context
                .network_id
                .clone()
                .unwrap_or_else(|| "none".to_string()),
            client_id: context
                .client_id
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        };

        if let Some(entry) = self.cache.get(&key) {
            if now.saturating_sub(entry.at_ms) < self.cache_timeout_ms {
                return AuthorityDecision {
                    granted: entry.granted,
                    rule: entry.rule.clone(),
                    cached: true,
                };
            }
        }

        let matched = self.first_match(target, &context);
        debug!(
            "Authority for {} ({}): {} via {}",
            key.type_name,
            key.network_id,
            matched.is_some(),
            matched.as_deref().unwrap_or("default deny")
        );

        self.cache.insert(
            key,
            CacheEntry {
                granted: matched.is_some(),
                rule: matched.clone(),
                at_ms: now,
            },
        );

        AuthorityDecision {
            granted: matched.is_some(),
            rule: matched,
            cached: false,
        }
    }

    /// Whether a recorded change to this field should go out on the wire
    pub fn should_sync(&mut self, target: &dyn SyncTarget, declaration: &FieldDeclaration) -> bool {
        if self.environment == Environment::Server || !declaration.authority_only {
            return true;
        }
        self.has_authority(target, None)
    }

    fn build_context(
        &self,
        target: &dyn SyncTarget,
        client_id: Option<&str>,
        now: u64,
    ) -> AuthorityContext {
        let identity = target.identity();
        let level = match self.environment {
            Environment::Server => AuthorityLevel::Full,
            Environment::Client if identity.is_local_owner && identity.has_authority => {
                AuthorityLevel::Owner
            }
            Environment::Client => AuthorityLevel::None,
        };

        AuthorityContext {
            environment: self.environment,
            network_id: (!identity.network_id.is_empty()).then(|| identity.network_id.clone()),
            entity_id: identity.entity_id.clone(),
            client_id: client_id
                .map(str::to_string)
                .or_else(|| self.local_client_id.clone()),
            level,
            timestamp_ms: now,
        }
    }

    fn first_match(&self, target: &dyn SyncTarget, context: &AuthorityContext) -> Option<String> {
        for rule in self.rules.iter().filter(|r| r.enabled) {
            match (rule.predicate)(target, context) {
                Ok(true) => return Some(rule.name.clone()),
                Ok(false) => {}
                Err(e) => warn!("Authority rule {} failed, treating as no match: {}", rule.name, e),
            }
        }
        None
    }
}

impl fmt::Debug for AuthorityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityEngine")
            .field("environment", &self.environment)
            .field("local_client_id", &self.local_client_id)
            .field("rules", &self.rules)
            .field("cached", &self.cache.len())
            .field("cache_timeout_ms", &self.cache_timeout_ms)
            .finish()
    }
}

/// The built-in rules, highest priority first
pub fn default_rules() -> Vec<AuthorityRule> {
    vec![
        AuthorityRule::new(SERVER_RULE, 1000, |_, context| {
            Ok(context.environment == Environment::Server)
        }),
        AuthorityRule::new(OWNER_RULE, 900, |target, context| {
            let identity = target.identity();
            Ok(context.environment == Environment::Client
                && identity.is_local_owner
                && identity.has_authority)
        }),
        AuthorityRule::new(COMPONENT_RULE, 800, |target, context| {
            Ok(target.component().check_authority(context) == Some(true))
        }),
        AuthorityRule::new(ENTITY_OWNER_RULE, 700, |target, context| {
            Ok(context.environment == Environment::Client
                && match (target.component().owner_id(), context.client_id.as_deref()) {
                    (Some(owner), Some(client)) => owner == client,
                    _ => false,
                })
        }),
    ]
}

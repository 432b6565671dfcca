//! Call routing.
//!
//! Decides which persona key applies to a call. Priority:
//! 1. explicit selector (`?bot=` on the media stream URL)
//! 2. explicit selector passed as a `bot` custom parameter
//! 3. called number (`to` custom parameter) looked up in the routing table
//! 4. configured default key

use serde_json::Value;
use std::collections::HashMap;

use crate::core::persona::normalize_key;

/// Custom parameter carrying an explicit bot selector.
pub const BOT_PARAMETER: &str = "bot";

/// Custom parameters that may carry the called number, checked in order.
pub const CALLED_NUMBER_PARAMETERS: [&str; 3] = ["to", "To", "called"];

/// How a routing key was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Selector,
    CalledNumber,
    Default,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Selector => "selector",
            RouteSource::CalledNumber => "called_number",
            RouteSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub key: String,
    pub source: RouteSource,
}

/// Reduce a phone number to its digits so formatting differences still match.
pub fn normalize_number(number: &str) -> Option<String> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Static routing table from called number to persona key.
#[derive(Debug, Clone)]
pub struct CallRouter {
    routes: HashMap<String, String>,
    default_key: String,
}

impl CallRouter {
    /// Entries whose number has no digits are dropped with a warning.
    pub fn new(routes: &HashMap<String, String>, default_key: &str) -> Self {
        let routes = routes
            .iter()
            .filter_map(|(number, key)| match normalize_number(number) {
                Some(digits) => Some((digits, normalize_key(key))),
                None => {
                    tracing::warn!(number = %number, "Ignoring route without digits");
                    None
                }
            })
            .collect();

        Self {
            routes,
            default_key: normalize_key(default_key),
        }
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Pick the persona key for a call.
    pub fn route(&self, selector: Option<&str>, custom_parameters: &HashMap<String, Value>) -> RouteDecision {
        let explicit = selector
            .map(normalize_key)
            .filter(|key| !key.is_empty())
            .or_else(|| {
                parameter_str(custom_parameters, BOT_PARAMETER)
                    .map(|bot| normalize_key(&bot))
                    .filter(|key| !key.is_empty())
            });

        if let Some(key) = explicit {
            return RouteDecision {
                key,
                source: RouteSource::Selector,
            };
        }

        let routed = CALLED_NUMBER_PARAMETERS
            .iter()
            .filter_map(|name| parameter_str(custom_parameters, name))
            .filter_map(|number| normalize_number(&number))
            .find_map(|digits| self.routes.get(&digits).cloned());

        match routed {
            Some(key) => RouteDecision {
                key,
                source: RouteSource::CalledNumber,
            },
            None => RouteDecision {
                key: self.default_key.clone(),
                source: RouteSource::Default,
            },
        }
    }
}

fn parameter_str(parameters: &HashMap<String, Value>, name: &str) -> Option<String> {
    match parameters.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

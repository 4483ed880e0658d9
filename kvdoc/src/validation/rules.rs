//! Named string predicates referenced by `validation=` field modifiers.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A validation predicate over a value's display string.
pub type RuleFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Mapping from rule name to predicate. Built-ins and caller-supplied rules
/// live side by side; a later registration under the same name wins.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, RuleFn>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `isemail`, `iscpf`, `iscnpj`, `isalphanumeric`
    /// and `isnumber`.
    pub fn builtin() -> Self {
        RuleRegistry::new()
            .with("isemail", is_email)
            .with("iscpf", is_cpf)
            .with("iscnpj", is_cnpj)
            .with("isalphanumeric", is_alphanumeric)
            .with("isnumber", is_number)
    }

    /// Add or replace a rule.
    pub fn register<F>(&mut self, name: impl Into<String>, rule: F) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.rules.insert(name.into(), Arc::new(rule));
        self
    }

    /// Builder form of [`RuleRegistry::register`].
    pub fn with<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.register(name, rule);
        self
    }

    /// Merge `other` into this registry; entries of `other` override.
    pub fn merge(&mut self, other: RuleRegistry) {
        self.rules.extend(other.rules);
    }

    pub fn get(&self, name: &str) -> Option<&RuleFn> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Run a rule. `None` when no rule is registered under `name`.
    pub fn check(&self, name: &str, value: &str) -> Option<bool> {
        self.rules.get(name).map(|rule| rule(value))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.names())
            .finish()
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("email pattern compiles")
    })
}

fn alphanumeric_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]*$").expect("alphanumeric pattern compiles"))
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-+]?[0-9]+(?:\.[0-9]+)?$").expect("number pattern compiles")
    })
}

pub fn is_email(value: &str) -> bool {
    email_regex().is_match(value)
}

pub fn is_alphanumeric(value: &str) -> bool {
    alphanumeric_regex().is_match(value)
}

pub fn is_number(value: &str) -> bool {
    number_regex().is_match(value)
}

/// Brazilian individual taxpayer id (CPF), with or without `.`/`-` punctuation.
pub fn is_cpf(value: &str) -> bool {
    let Some(digits) = strip_to_digits(value, &['.', '-'], 11) else {
        return false;
    };
    if all_same(&digits) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let top = len as u32 + 1;
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (top - i as u32))
            .sum();
        match sum * 10 % 11 {
            10 => 0,
            r => r,
        }
    };

    check(9) == digits[9] && check(10) == digits[10]
}

/// Brazilian company id (CNPJ), with or without `.`/`-`/`/` punctuation.
pub fn is_cnpj(value: &str) -> bool {
    const FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const SECOND: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let Some(digits) = strip_to_digits(value, &['.', '-', '/'], 14) else {
        return false;
    };
    if all_same(&digits) {
        return false;
    }

    let check = |weights: &[u32]| -> u32 {
        let sum: u32 = weights.iter().zip(&digits).map(|(w, d)| w * d).sum();
        match sum % 11 {
            r if r < 2 => 0,
            r => 11 - r,
        }
    };

    check(&FIRST) == digits[12] && check(&SECOND) == digits[13]
}

/// Drop punctuation and require exactly `len` ASCII digits.
fn strip_to_digits(value: &str, punctuation: &[char], len: usize) -> Option<Vec<u32>> {
    let digits: Option<Vec<u32>> = value
        .trim()
        .chars()
        .filter(|c| !punctuation.contains(c))
        .map(|c| c.to_digit(10))
        .collect();
    digits.filter(|d| d.len() == len)
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

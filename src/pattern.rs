//! Schedulable pattern types
//!
//! A pattern is whatever a performer hands to the scheduler. Only plain
//! functions and bound methods can actually run; the other [`Callable`]
//! variants exist so rejections can name what was received. Bodies are
//! async closures invoked once per transport pulse with the arguments
//! the pattern was scheduled with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use eyre::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invocable pattern body, called once per pulse
pub type PatternBody = Arc<dyn Fn(PatternArgs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Positional and keyword arguments bound to a scheduled pattern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternArgs {
    /// Positional arguments, in call order
    pub positional: Vec<Value>,

    /// Keyword arguments
    pub keyword: HashMap<String, Value>,
}

impl PatternArgs {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from positional values only
    pub fn from_positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: HashMap::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_keyword(mut self, key: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// A body/argument pair handed to a runner
///
/// Runners hold at most one of these pending and apply it at their next
/// safe suspension point, so pushing a new update replaces any earlier
/// one that has not taken effect yet.
#[derive(Clone)]
pub struct PatternUpdate {
    pub body: PatternBody,
    pub args: PatternArgs,
}

impl fmt::Debug for PatternUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternUpdate").field("args", &self.args).finish_non_exhaustive()
    }
}

/// What a performer handed to the scheduler
///
/// The scheduler accepts `Function` and `Method` and rejects everything
/// else with an error naming the actual kind received.
#[derive(Clone)]
pub enum Callable {
    /// A plain named function
    Function { name: String, body: PatternBody },

    /// A method bound to a receiver
    Method {
        receiver: String,
        name: String,
        body: PatternBody,
    },

    /// A builtin, carrying its name for diagnostics
    Builtin { name: String },

    /// A bare value, carrying its type name for diagnostics
    Value { type_name: String },

    /// A type object
    Type { name: String },
}

impl Callable {
    /// Wrap an async closure as a named function
    pub fn function<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(PatternArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Function {
            name: name.into(),
            body: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// Wrap an async closure as a method bound to `receiver`
    pub fn method<F, Fut>(receiver: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(PatternArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Method {
            receiver: receiver.into(),
            name: name.into(),
            body: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    /// The declared name, where the variant has one
    pub fn name(&self) -> Option<&str> {
        match self {
            Callable::Function { name, .. }
            | Callable::Method { name, .. }
            | Callable::Builtin { name }
            | Callable::Type { name } => Some(name),
            Callable::Value { .. } => None,
        }
    }

    /// Short kind label used in rejection errors
    pub fn kind_name(&self) -> &str {
        match self {
            Callable::Function { .. } => "function",
            Callable::Method { .. } => "method",
            Callable::Builtin { .. } => "builtin",
            Callable::Value { type_name } => type_name,
            Callable::Type { .. } => "type",
        }
    }

    /// Whether the scheduler will accept this callable
    pub fn schedulable(&self) -> bool {
        matches!(self, Callable::Function { .. } | Callable::Method { .. })
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function { name, .. } => f.debug_struct("Function").field("name", name).finish_non_exhaustive(),
            Callable::Method { receiver, name, .. } => f
                .debug_struct("Method")
                .field("receiver", receiver)
                .field("name", name)
                .finish_non_exhaustive(),
            Callable::Builtin { name } => f.debug_struct("Builtin").field("name", name).finish(),
            Callable::Value { type_name } => f.debug_struct("Value").field("type_name", type_name).finish(),
            Callable::Type { name } => f.debug_struct("Type").field("name", name).finish(),
        }
    }
}

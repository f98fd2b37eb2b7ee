// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use snafu::Snafu;

/// Errors a collaborator (adapter or watcher) may hand back to the engine
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A combining error type which is returned by most major arbiter methods
///
/// Derived using [`snafu::Snafu`]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read model file, {source}"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("Failed to compile model, {source}"), context(false))]
    Compile { source: CompileError },

    #[snafu(display("Failed to evaluate request, {source}"), context(false))]
    Evaluation { source: EvalError },

    #[snafu(display("Adapter error, {source}"))]
    Adapter { source: BoxError },

    #[snafu(display("An engine named `{name}` is already registered"))]
    InstanceExists { name: String },

    #[snafu(display("No role manager is declared for ptype `{ptype}`"))]
    UnknownRoleManager { ptype: String },

    #[snafu(whatever, display("{message}"))]
    Custom { message: String },
}

/// The error type returned when lowering a parsed model into its executable
/// parts (matcher predicate and effect reducer)
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
    #[snafu(display("model has no `{key}` key in its `{section}` section"))]
    MissingDefinition {
        section: &'static str,
        key: &'static str,
    },

    #[snafu(display("syntax error in matcher expression, {message}"))]
    Syntax { message: String },

    #[snafu(display("unknown field `{base}.{field}` in matcher expression"))]
    UnknownField { base: String, field: String },

    #[snafu(display("unknown identifier `{name}` in matcher expression"))]
    UnknownIdentifier { name: String },

    #[snafu(display("unknown function `{name}` in matcher expression"))]
    UnknownFunction { name: String },

    #[snafu(display("`{name}` takes {expected} arguments, found {found}"))]
    WrongArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[snafu(display("RoleManager for '{name}' not found"))]
    RoleManagerNotFound { name: String },

    #[snafu(display("unsupported policy effect `{expr}`"))]
    UnsupportedEffect { expr: String },
}

/// The error type returned when a compiled matcher is invoked with value
/// vectors shorter than the model definitions it was compiled against
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EvalError {
    #[snafu(display("request has no value at field index {index} (got {len} values)"))]
    RequestFieldOutOfRange { index: usize, len: usize },

    #[snafu(display("policy rule has no value at field index {index} (got {len} values)"))]
    PolicyFieldOutOfRange { index: usize, len: usize },
}

/// A default specialized Result type for arbiter
pub type Result<T, E = Error> = std::result::Result<T, E>;

use std::time::{Duration, Instant};

use analyst_tools::{truncate_output, TruncationMode};
use analyst_types::{Dataset, SandboxSettings};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    ArithmeticPackage, BasicArrayPackage, BasicIteratorPackage, BasicMapPackage,
    BasicMathPackage, BasicStringPackage, LanguageCorePackage, LogicPackage, MoreStringPackage,
    Package,
};
use rhai::{Dynamic, Engine, Position, Scope, AST};
use serde::Serialize;

use crate::error::{ExecutionError, SyntaxIssue};
use crate::frame::{self, Frame};
use crate::library::{self, Frames, Numeric};
use crate::render;

/// Name of the variable a snippet must assign its answer to.
pub const RESULT_SLOT: &str = "result";

/// How often (in interpreter operations) the deadline is checked.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Extra time the worker gets past the deadline before it is abandoned.
const HARD_STOP_GRACE: Duration = Duration::from_millis(500);

/// A successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    pub text: String,
    pub type_name: String,
}

pub type ExecutionResult = Result<ExecutionOutput, ExecutionError>;

/// Validates and runs data-query snippets against an isolated dataset copy.
///
/// Snippets see `df` (the dataset), the `pd` and `np` helper handles and a
/// small prelude. There is no filesystem, network, process, environment or
/// module access. The answer must be assigned to `result`.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    settings: SandboxSettings,
}

impl SandboxExecutor {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Parse without executing. Purely syntactic.
    pub fn validate(&self, code: &str) -> Result<(), SyntaxIssue> {
        let engine = build_engine(&self.settings, None);
        engine
            .compile(code)
            .map(|_| ())
            .map_err(|e| SyntaxIssue::from(&e))
    }

    /// Run with the configured timeout.
    pub async fn execute(&self, code: &str, dataset: &Dataset) -> ExecutionResult {
        self.execute_with_timeout(code, dataset, self.default_timeout())
            .await
    }

    /// Run `code` against a copy of `dataset`, bounded by `timeout`.
    ///
    /// The interpreter checks the deadline cooperatively; a worker stuck in a
    /// single native call is abandoned once the grace period passes.
    pub async fn execute_with_timeout(
        &self,
        code: &str,
        dataset: &Dataset,
        timeout: Duration,
    ) -> ExecutionResult {
        let frame = Frame(dataset.clone());
        let code_owned = code.to_string();
        let settings = self.settings.clone();
        let started = Instant::now();
        let deadline = started + timeout;

        let worker = tokio::task::spawn_blocking(move || {
            run_script(&code_owned, frame, &settings, deadline, timeout)
        });

        let outcome = match tokio::time::timeout(timeout + HARD_STOP_GRACE, worker).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(ExecutionError::new(
                crate::ErrorKind::Runtime,
                format!("execution worker failed: {join_err}"),
            )),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Sandbox worker did not stop at its deadline; abandoning it"
                );
                Err(ExecutionError::timeout(timeout))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(out) => tracing::info!(
                elapsed_ms,
                result_type = %out.type_name,
                chars = out.text.chars().count(),
                "Sandbox execution succeeded"
            ),
            Err(e) => tracing::warn!(elapsed_ms, kind = %e.kind, error = %e.message, "Sandbox execution failed"),
        }
        outcome
    }
}

fn build_engine(settings: &SandboxSettings, deadline: Option<Instant>) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(LanguageCorePackage::new().as_shared_module());
    engine.register_global_module(ArithmeticPackage::new().as_shared_module());
    engine.register_global_module(LogicPackage::new().as_shared_module());
    engine.register_global_module(BasicStringPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());
    engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.on_print(|_: &str| {});
    engine.on_debug(|_: &str, _: Option<&str>, _: Position| {});

    if settings.max_operations > 0 {
        engine.set_max_operations(settings.max_operations);
    }
    engine.set_max_array_size(settings.max_collection_size);
    engine.set_max_map_size(settings.max_collection_size);
    engine.set_max_string_size(settings.max_collection_size);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 32);

    if let Some(deadline) = deadline {
        engine.on_progress(move |ops| {
            if ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
    }

    frame::register(&mut engine);
    library::register(&mut engine);
    engine
}

/// Whether `name` is callable under any signature, natively or as a
/// function defined by the snippet itself.
fn is_registered(engine: &Engine, ast: &AST, name: &str) -> bool {
    ast.iter_functions().any(|f| f.name == name)
        || engine
            .gen_fn_signatures(true)
            .iter()
            .any(|sig| sig.split_once('(').is_some_and(|(n, _)| n.trim() == name))
}

fn run_script(
    code: &str,
    frame: Frame,
    settings: &SandboxSettings,
    deadline: Instant,
    timeout: Duration,
) -> ExecutionResult {
    let engine = build_engine(settings, Some(deadline));
    let ast = engine
        .compile(code)
        .map_err(|e| ExecutionError::from_parse(&e))?;

    let mut scope = Scope::new();
    scope.push("df", frame);
    scope.push("pd", Frames);
    scope.push("np", Numeric);
    scope.push_dynamic(RESULT_SLOT, Dynamic::UNIT);

    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| ExecutionError::from_eval(&e, timeout, &|name| is_registered(&engine, &ast, name)))?;

    let value = scope
        .get_value::<Dynamic>(RESULT_SLOT)
        .unwrap_or(Dynamic::UNIT);
    if value.is_unit() {
        return Err(ExecutionError::missing_result(RESULT_SLOT));
    }

    let text = render::render(&value);
    Ok(ExecutionOutput {
        text: truncate_output(&text, settings.max_output_chars, TruncationMode::Head),
        type_name: render::type_label(&value),
    })
}

//! Device commands exposed to rhai test scripts
//!
//! Every command is registered both globally (`CpuMemRd(0x8000, 4)`) and
//! under the `nesdbg` module (`nesdbg::CpuMemRd(0x8000, 4)`). Byte arrays
//! cross the boundary as rhai arrays of integers.
//!
//! A script reports its verdict by returning `PASS`, `FAIL` or `ERROR`
//! (0, 1, 2). Any error escaping the script counts as `ERROR`.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Module, Position, Scope, INT};

use crate::common::{Error, Result};
use crate::device::{self, DeviceClient, WaitOptions};
use crate::packet::CpuReg;
use crate::testing::{ScriptExecutor, ScriptResult};

type ScriptResultOf<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Settings shared by every script in a batch
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Directory `LoadAsm` reads program images from
    pub asm_dir: PathBuf,
    /// Polling behaviour of `WaitForHlt`; its cancel token also interrupts scripts
    pub wait: WaitOptions,
}

/// State captured by the registered command closures
#[derive(Clone)]
struct Host {
    client: Rc<RefCell<DeviceClient>>,
    /// Host-side error behind the most recent script-visible failure
    failure: Rc<RefCell<Option<Error>>>,
    options: Rc<BridgeOptions>,
}

impl Host {
    fn call<T>(&self, f: impl FnOnce(&mut DeviceClient) -> Result<T>) -> ScriptResultOf<T> {
        let result = f(&mut self.client.borrow_mut());
        result.map_err(|e| self.fail(e))
    }

    fn fail(&self, error: Error) -> Box<EvalAltResult> {
        let message = error.to_string();
        *self.failure.borrow_mut() = Some(error);
        Box::new(EvalAltResult::ErrorRuntime(message.into(), Position::NONE))
    }

    fn usage(&self, message: String) -> Box<EvalAltResult> {
        self.fail(Error::ScriptUsage(message))
    }

    fn u16_arg(&self, command: &str, what: &str, value: INT) -> ScriptResultOf<u16> {
        u16::try_from(value).map_err(|_| {
            self.usage(format!(
                "{}: {} {} is outside 0..=65535",
                command, what, value
            ))
        })
    }

    fn u8_arg(&self, command: &str, what: &str, value: INT) -> ScriptResultOf<u8> {
        u8::try_from(value)
            .map_err(|_| self.usage(format!("{}: {} {} is outside 0..=255", command, what, value)))
    }

    fn reg_arg(&self, command: &str, value: INT) -> ScriptResultOf<CpuReg> {
        u8::try_from(value)
            .ok()
            .and_then(|byte| CpuReg::try_from(byte).ok())
            .ok_or_else(|| {
                self.usage(format!(
                    "{}: register selector {} is not one of PCL, PCH, AC, X, Y, P, S",
                    command, value
                ))
            })
    }

    /// Check `count` against the array and convert its elements to bytes
    fn bytes_arg(&self, command: &str, count: INT, data: Array) -> ScriptResultOf<Vec<u8>> {
        let count = self.u16_arg(command, "count", count)?;
        if data.len() != count as usize {
            return Err(self.usage(format!(
                "{}: count {} does not match array length {}",
                command,
                count,
                data.len()
            )));
        }

        data.into_iter()
            .enumerate()
            .map(|(i, value)| {
                value
                    .as_int()
                    .ok()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        self.usage(format!(
                            "{}: element {} is not a byte value (0..=255)",
                            command, i
                        ))
                    })
            })
            .collect()
    }
}

fn to_array(bytes: Vec<u8>) -> Array {
    bytes.into_iter().map(|b| Dynamic::from(b as INT)).collect()
}

fn build_module(host: &Host) -> Module {
    let mut module = Module::new();

    let h = host.clone();
    module.set_native_fn("Echo", move |count: INT, data: Array| -> ScriptResultOf<Array> {
        let data = h.bytes_arg("Echo", count, data)?;
        Ok(to_array(h.call(|c| c.echo(data))?))
    });

    let h = host.clone();
    module.set_native_fn("CpuMemRd", move |addr: INT, count: INT| -> ScriptResultOf<Array> {
        let addr = h.u16_arg("CpuMemRd", "address", addr)?;
        let count = h.u16_arg("CpuMemRd", "count", count)?;
        Ok(to_array(h.call(|c| c.cpu_mem_read(addr, count))?))
    });

    let h = host.clone();
    module.set_native_fn(
        "CpuMemWr",
        move |addr: INT, count: INT, data: Array| -> ScriptResultOf<()> {
            let addr = h.u16_arg("CpuMemWr", "address", addr)?;
            let data = h.bytes_arg("CpuMemWr", count, data)?;
            h.call(|c| c.cpu_mem_write(addr, data))
        },
    );

    let h = host.clone();
    module.set_native_fn("PpuMemRd", move |addr: INT, count: INT| -> ScriptResultOf<Array> {
        let addr = h.u16_arg("PpuMemRd", "address", addr)?;
        let count = h.u16_arg("PpuMemRd", "count", count)?;
        Ok(to_array(h.call(|c| c.ppu_mem_read(addr, count))?))
    });

    let h = host.clone();
    module.set_native_fn(
        "PpuMemWr",
        move |addr: INT, count: INT, data: Array| -> ScriptResultOf<()> {
            let addr = h.u16_arg("PpuMemWr", "address", addr)?;
            let data = h.bytes_arg("PpuMemWr", count, data)?;
            h.call(|c| c.ppu_mem_write(addr, data))
        },
    );

    let h = host.clone();
    module.set_native_fn("DbgHlt", move || -> ScriptResultOf<()> { h.call(|c| c.halt()) });

    let h = host.clone();
    module.set_native_fn("DbgRun", move || -> ScriptResultOf<()> { h.call(|c| c.run()) });

    let h = host.clone();
    module.set_native_fn("CpuRegRd", move |sel: INT| -> ScriptResultOf<INT> {
        let reg = h.reg_arg("CpuRegRd", sel)?;
        Ok(h.call(|c| c.cpu_reg_read(reg))? as INT)
    });

    let h = host.clone();
    module.set_native_fn("CpuRegWr", move |sel: INT, value: INT| -> ScriptResultOf<()> {
        let reg = h.reg_arg("CpuRegWr", sel)?;
        let value = h.u8_arg("CpuRegWr", "value", value)?;
        h.call(|c| c.cpu_reg_write(reg, value))
    });

    let h = host.clone();
    module.set_native_fn("WaitForHlt", move || -> ScriptResultOf<()> {
        let options = h.options.wait.clone();
        h.call(|c| c.wait_for_halt(&options)).map(|_| ())
    });

    // Per-call timeout in milliseconds; 0 waits until halted or cancelled
    let h = host.clone();
    module.set_native_fn("WaitForHlt", move |timeout_ms: INT| -> ScriptResultOf<()> {
        let timeout_ms = u64::try_from(timeout_ms).map_err(|_| {
            h.usage(format!("WaitForHlt: timeout {} must not be negative", timeout_ms))
        })?;
        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        let options = h.options.wait.clone().with_timeout(timeout);
        h.call(|c| c.wait_for_halt(&options)).map(|_| ())
    });

    let h = host.clone();
    module.set_native_fn("LoadAsm", move |file_name: ImmutableString| -> ScriptResultOf<INT> {
        let asm_dir = h.options.asm_dir.clone();
        let start = h.call(|c| device::load_asm(c, &asm_dir, file_name.as_str()))?;
        Ok(start as INT)
    });

    module
}

/// rhai engine wired to one device client
pub struct ScriptBridge {
    engine: Engine,
    host: Host,
    output: Rc<RefCell<String>>,
}

impl ScriptBridge {
    pub fn new(client: Rc<RefCell<DeviceClient>>, options: BridgeOptions) -> Self {
        let host = Host {
            client,
            failure: Rc::new(RefCell::new(None)),
            options: Rc::new(options),
        };
        let output = Rc::new(RefCell::new(String::new()));

        let mut engine = Engine::new();

        let sink = output.clone();
        engine.on_print(move |text| {
            let mut sink = sink.borrow_mut();
            sink.push_str(text);
            sink.push('\n');
        });
        engine.on_debug(|text, source, pos| {
            tracing::debug!(source = source.unwrap_or("script"), %pos, "{}", text);
        });

        let cancel = host.options.wait.cancel.clone();
        engine.on_progress(move |_| cancel.is_cancelled().then_some(Dynamic::UNIT));

        let module: rhai::Shared<Module> = build_module(&host).into();
        engine.register_global_module(module.clone());
        engine.register_static_module("nesdbg", module);

        Self {
            engine,
            host,
            output,
        }
    }

    /// Convenience constructor owning the client outright
    pub fn with_client(client: DeviceClient, options: BridgeOptions) -> Self {
        Self::new(Rc::new(RefCell::new(client)), options)
    }

    /// Run script source text and map its return value to a verdict
    ///
    /// Each run starts from a fresh scope holding the verdict and register
    /// constants; nothing a script defines is visible to the next one.
    pub fn eval(&mut self, source: &str, output: &mut String) -> Result<ScriptResult> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| Error::ScriptEngine(format!("Syntax error: {}", e)))?;
        self.run_ast(&ast, output)
    }

    fn run_ast(&mut self, ast: &rhai::AST, output: &mut String) -> Result<ScriptResult> {
        let mut scope = Scope::new();
        for result in [ScriptResult::Pass, ScriptResult::Fail, ScriptResult::Error] {
            scope.push_constant(result.as_str(), result.code() as INT);
        }
        for reg in CpuReg::ALL {
            scope.push_constant(reg.name(), reg.byte() as INT);
        }

        self.host.failure.borrow_mut().take();
        self.output.borrow_mut().clear();

        let outcome = self.engine.eval_ast_with_scope::<Dynamic>(&mut scope, ast);
        output.push_str(&self.output.borrow_mut().split_off(0));

        let value = match outcome {
            Ok(value) => value,
            Err(err) => return Err(self.classify(*err)),
        };

        let code = value.as_int().map_err(|type_name| {
            Error::ScriptEngine(format!(
                "script returned {}, expected PASS, FAIL or ERROR",
                type_name
            ))
        })?;
        ScriptResult::from_code(code).ok_or_else(|| {
            Error::ScriptEngine(format!(
                "script returned {}, expected PASS, FAIL or ERROR",
                code
            ))
        })
    }

    /// Turn an escaped rhai error into the most specific host error
    ///
    /// The recorded host failure only explains `err` when it is the error
    /// that escaped; one the script caught earlier is discarded.
    fn classify(&self, err: EvalAltResult) -> Error {
        let message = err.to_string();
        let failure = self
            .host
            .failure
            .borrow_mut()
            .take()
            .filter(|failure| escaped_host_error(&err, failure));
        match (err, failure) {
            (EvalAltResult::ErrorTerminated(..), _) => Error::Cancelled,
            (_, Some(Error::ScriptUsage(_))) => Error::ScriptUsage(message),
            (_, Some(host_error)) => host_error,
            (EvalAltResult::ErrorFunctionNotFound(..), None) => Error::ScriptUsage(message),
            (_, None) => Error::ScriptEngine(message),
        }
    }
}

/// Innermost error, looking through script function call frames
fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

fn escaped_host_error(err: &EvalAltResult, failure: &Error) -> bool {
    match root_cause(err) {
        EvalAltResult::ErrorRuntime(value, _) => value.to_string() == failure.to_string(),
        _ => false,
    }
}

impl ScriptExecutor for ScriptBridge {
    fn execute(&mut self, path: &Path, output: &mut String) -> Result<ScriptResult> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::script_load(path, e))?;
        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| Error::script_load(path, e))?;

        tracing::debug!(script = %path.display(), "Running script");
        self.run_ast(&ast, output)
    }
}

//! Host Python interpreter as the embedded runtime.
//!
//! The interpreter runs a small driver that reads one JSON request per line on stdin
//! and answers with one JSON line on stdout. Output printed by hosted code is moved to
//! stderr, which is forwarded to the log.

use super::{EntrypointArgs, Result, RuntimeConfig, RuntimeError, RuntimeHandle, RuntimeLoader};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const DRIVER: &str = r#"
import json, sys, traceback
_reply = sys.stdout
sys.stdout = sys.stderr
_scope = {"__name__": "__runner__"}
for _line in sys.stdin:
    if not _line.strip():
        continue
    _request = json.loads(_line)
    try:
        if _request["op"] == "exec":
            exec(compile(_request["code"], "<runner>", "exec"), _scope)
            _result = {"ok": True, "value": None}
        else:
            _result = {"ok": True, "value": _scope[_request["fn"]](_request["arg"])}
    except BaseException as _exc:
        _result = {"ok": False, "error": f"{type(_exc).__name__}: {_exc}", "trace": traceback.format_exc()}
    _reply.write(json.dumps(_result, default=str) + "\n")
    _reply.flush()
"#;

const SITE_DIR: &str = "site-packages";

pub struct PythonLoader {
    program: String,
    storage_root: PathBuf,
}

impl PythonLoader {
    pub fn new(program: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            storage_root: storage_root.into(),
        }
    }
}

#[async_trait]
impl RuntimeLoader for PythonLoader {
    async fn acquire(&self, config: &RuntimeConfig) -> Result<Box<dyn RuntimeHandle>> {
        tokio::fs::create_dir_all(&self.storage_root).await?;
        let storage_root = tokio::fs::canonicalize(&self.storage_root).await?;

        let mut child = Command::new(&self.program)
            .args(["-u", "-c", DRIVER])
            .current_dir(&storage_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Protocol("runtime stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Protocol("runtime stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("eqlize-console/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RuntimeError::Protocol(format!("http client: {e}")))?;

        let handle = PythonHandle {
            program: self.program.clone(),
            storage_root,
            index_url: config.index_url.clone(),
            http,
            driver: Mutex::new(Driver {
                _child: child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
        };

        // The interpreter is only acquired once it answers a request.
        handle.exec("import sys").await?;
        tracing::debug!(program = %handle.program, root = %handle.storage_root.display(), "runtime acquired");
        Ok(Box::new(handle))
    }
}

struct PythonHandle {
    program: String,
    storage_root: PathBuf,
    index_url: String,
    http: reqwest::Client,
    driver: Mutex<Driver>,
}

struct Driver {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Exec {
        code: &'a str,
    },
    Call {
        #[serde(rename = "fn")]
        function: &'a str,
        arg: &'a str,
    },
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    trace: Option<String>,
}

impl Driver {
    async fn request(&mut self, request: &Request<'_>) -> Result<serde_json::Value> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| RuntimeError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self.stdout.next_line().await?.ok_or(RuntimeError::Closed)?;
        let response: Response = serde_json::from_str(&reply)
            .map_err(|e| RuntimeError::Protocol(format!("decode reply: {e}")))?;
        if response.ok {
            Ok(response.value)
        } else {
            Err(RuntimeError::Script {
                message: response
                    .error
                    .unwrap_or_else(|| "unknown runtime error".to_string()),
                trace: response.trace,
            })
        }
    }
}

impl PythonHandle {
    async fn exec(&self, code: &str) -> Result<()> {
        let mut driver = self.driver.lock().await;
        driver.request(&Request::Exec { code }).await.map(|_| ())
    }
}

#[async_trait]
impl RuntimeHandle for PythonHandle {
    async fn load_capabilities(&self, names: &[String]) -> Result<()> {
        for name in names {
            if !is_module_name(name) {
                return Err(RuntimeError::InvalidName(name.clone()));
            }
            tracing::debug!(capability = %name, "loading capability");
            self.exec(&format!("import {name}")).await?;
        }
        Ok(())
    }

    async fn install_package(&self, locator: &str) -> Result<()> {
        let site = self.storage_root.join(SITE_DIR);
        let output = Command::new(&self.program)
            .args([
                "-m",
                "pip",
                "install",
                "--quiet",
                "--disable-pip-version-check",
                "--upgrade",
                "--target",
            ])
            .arg(&site)
            .args(["--index-url", self.index_url.as_str()])
            .arg(locator)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(RuntimeError::Command {
                program: format!("{} -m pip", self.program),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let site = py_str(&site.display().to_string());
        self.exec(&format!(
            "import importlib, sys\nif {site} not in sys.path:\n    sys.path.insert(0, {site})\nimportlib.invalidate_caches()"
        ))
        .await
    }

    async fn materialize_asset(&self, source: &str, dest: &str) -> Result<u64> {
        let target = resolve_storage_path(&self.storage_root, dest)?;
        let bytes = fetch_asset(&self.http, source).await?;
        write_asset(&target, &bytes).await
    }

    async fn prime_query_entrypoint(&self, code: &str) -> Result<()> {
        self.exec(code).await
    }

    async fn run_query(&self, args: &EntrypointArgs) -> Result<String> {
        let mut driver = self.driver.lock().await;
        let value = driver
            .request(&Request::Call {
                function: &args.function,
                arg: &args.argument,
            })
            .await?;
        Ok(match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    fn storage_path(&self, dest: &str) -> String {
        resolve_storage_path(&self.storage_root, dest)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| dest.to_string())
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "eqlize_console::runtime", "{line}");
    }
}

/// Map a storage destination (`/data/demo.sqlite`) below `root`.
fn resolve_storage_path(root: &Path, dest: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    let mut named = false;
    for component in Path::new(dest).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => {
                out.push(part);
                named = true;
            }
            Component::ParentDir | Component::Prefix(_) => {
                return Err(RuntimeError::InvalidPath(dest.to_string()))
            }
        }
    }
    if !named {
        return Err(RuntimeError::InvalidPath(dest.to_string()));
    }
    Ok(out)
}

async fn fetch_asset(http: &reqwest::Client, source: &str) -> Result<Vec<u8>> {
    let fetch_err = |reason: String| RuntimeError::Fetch {
        locator: source.to_string(),
        reason,
    };
    if source.starts_with("http://") || source.starts_with("https://") {
        let resp = http
            .get(source)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_err(format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }
        let body = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        Ok(body.to_vec())
    } else {
        tokio::fs::read(source)
            .await
            .map_err(|e| fetch_err(e.to_string()))
    }
}

async fn write_asset(target: &Path, bytes: &[u8]) -> Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await?;
    Ok(bytes.len() as u64)
}

fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Quote `s` as a Python string literal.
fn py_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

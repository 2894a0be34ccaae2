use std::collections::HashMap;

/// How a runtime's execution context is provisioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Long-lived compute unit the engine talks to over the message protocol.
    OffloadedWorker,
    /// Isolated rendering surface; content is injected, never interpreted here.
    SandboxedDocument,
    /// Synchronous in-process structural validation. Strictly non-executable
    /// content only; anything that runs caller logic goes through a worker.
    Inline,
}

/// Informational only; surfaced to the UI language list, never consulted
/// during dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupportLevel {
    Full,
    Partial,
    Experimental,
}

/// Immutable metadata for one supported runtime.
#[derive(Clone, Debug)]
pub struct RuntimeDescriptor {
    pub id: String,
    pub name: String,
    pub extensions: Vec<String>,
    pub strategy: ExecutionStrategy,
    pub version: String,
    pub timeout_ms: u64,
    pub max_memory_mb: u64,
    pub support_level: SupportLevel,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate runtime id: {0}")]
    DuplicateId(String),

    #[error("extension \"{extension}\" claimed by both \"{first}\" and \"{second}\"")]
    DuplicateExtension {
        extension: String,
        first: String,
        second: String,
    },
}

/// Static lookup table mapping runtime ids and file extensions to
/// descriptors. Constructed once at session start and never mutated.
#[derive(Debug)]
pub struct RuntimeRegistry {
    descriptors: Vec<RuntimeDescriptor>,
}

impl RuntimeRegistry {
    /// Builds a registry, rejecting duplicate ids and ambiguous extension
    /// claims so every extension belongs to exactly one descriptor.
    pub fn new(descriptors: Vec<RuntimeDescriptor>) -> Result<Self, RegistryError> {
        let mut seen_ids: HashMap<String, ()> = HashMap::new();
        let mut seen_exts: HashMap<String, String> = HashMap::new();

        for descriptor in &descriptors {
            let id = normalize(&descriptor.id);
            if seen_ids.insert(id.clone(), ()).is_some() {
                return Err(RegistryError::DuplicateId(descriptor.id.clone()));
            }
            for extension in &descriptor.extensions {
                let ext = normalize(extension);
                if let Some(first) = seen_exts.insert(ext.clone(), id.clone()) {
                    return Err(RegistryError::DuplicateExtension {
                        extension: ext,
                        first,
                        second: id,
                    });
                }
            }
        }

        Ok(Self { descriptors })
    }

    /// The production runtime table of the IDE.
    pub fn with_defaults() -> Self {
        Self::new(default_descriptors()).expect("default runtime table is consistent")
    }

    /// Resolves an id or a file extension to a descriptor.
    ///
    /// Exact id match wins; otherwise the (lower-cased, dot-stripped) input
    /// is scanned against every descriptor's extension set. No fuzzy match.
    pub fn resolve(&self, id_or_extension: &str) -> Option<&RuntimeDescriptor> {
        let needle = normalize(id_or_extension);
        if needle.is_empty() {
            return None;
        }

        self.descriptors
            .iter()
            .find(|d| normalize(&d.id) == needle)
            .or_else(|| {
                self.descriptors
                    .iter()
                    .find(|d| d.extensions.iter().any(|e| normalize(e) == needle))
            })
    }

    /// Resolves the runtime for an entry path by its extension.
    pub fn resolve_entry(&self, entry: &str) -> Option<&RuntimeDescriptor> {
        let file_name = entry.rsplit('/').next().unwrap_or(entry);
        let (_, extension) = file_name.rsplit_once('.')?;
        self.resolve(extension)
    }

    pub fn descriptors(&self) -> &[RuntimeDescriptor] {
        &self.descriptors
    }

    /// UX listing helper; has no effect on dispatch.
    pub fn with_support_level(&self, level: SupportLevel) -> Vec<&RuntimeDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.support_level == level)
            .collect()
    }
}

fn normalize(input: &str) -> String {
    input.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn descriptor(
    id: &str,
    name: &str,
    extensions: &[&str],
    strategy: ExecutionStrategy,
    version: &str,
    timeout_ms: u64,
    max_memory_mb: u64,
    support_level: SupportLevel,
    notes: &str,
) -> RuntimeDescriptor {
    RuntimeDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        extensions: extensions.iter().map(|e| e.to_string()).collect(),
        strategy,
        version: version.to_string(),
        timeout_ms,
        max_memory_mb,
        support_level,
        notes: if notes.is_empty() {
            None
        } else {
            Some(notes.to_string())
        },
    }
}

fn default_descriptors() -> Vec<RuntimeDescriptor> {
    use ExecutionStrategy::{Inline, OffloadedWorker, SandboxedDocument};
    use SupportLevel::{Experimental, Full, Partial};

    vec![
        descriptor(
            "javascript",
            "JavaScript/TypeScript",
            &["js", "jsx", "mjs", "ts", "tsx"],
            OffloadedWorker,
            "ES2023",
            30_000,
            512,
            Full,
            "runs in an offloaded worker, never in-process",
        ),
        descriptor(
            "python",
            "Python (Pyodide)",
            &["py", "pyw"],
            OffloadedWorker,
            "3.11",
            60_000,
            1024,
            Full,
            "full stdlib via Pyodide",
        ),
        descriptor(
            "c_cpp",
            "C/C++ (Clang)",
            &["c", "cpp", "cc", "cxx", "h", "hpp"],
            OffloadedWorker,
            "clang-15",
            60_000,
            2048,
            Partial,
            "WASM target, limited stdlib",
        ),
        descriptor(
            "go",
            "Go (TinyGo)",
            &["go"],
            OffloadedWorker,
            "1.21",
            60_000,
            1024,
            Partial,
            "limited cgo support",
        ),
        descriptor(
            "sql",
            "SQL (DuckDB)",
            &["sql"],
            OffloadedWorker,
            "0.9",
            30_000,
            512,
            Full,
            "local queries only",
        ),
        descriptor(
            "lua",
            "Lua",
            &["lua"],
            OffloadedWorker,
            "5.4",
            30_000,
            256,
            Full,
            "",
        ),
        descriptor(
            "php",
            "PHP",
            &["php"],
            OffloadedWorker,
            "8.2",
            30_000,
            512,
            Partial,
            "limited extensions",
        ),
        descriptor(
            "ruby",
            "Ruby",
            &["rb"],
            OffloadedWorker,
            "3.2",
            30_000,
            512,
            Partial,
            "limited stdlib",
        ),
        descriptor(
            "rust",
            "Rust",
            &["rs"],
            OffloadedWorker,
            "1.73",
            60_000,
            2048,
            Partial,
            "no_std WASM target",
        ),
        descriptor(
            "java",
            "Java (TeaVM)",
            &["java"],
            OffloadedWorker,
            "TeaVM",
            60_000,
            2048,
            Experimental,
            "limited reflection",
        ),
        descriptor(
            "haskell",
            "Haskell (Asterius)",
            &["hs"],
            OffloadedWorker,
            "Asterius",
            90_000,
            2048,
            Experimental,
            "large runtime asset",
        ),
        descriptor(
            "swift",
            "Swift (SwiftWasm)",
            &["swift"],
            OffloadedWorker,
            "5.9",
            60_000,
            2048,
            Experimental,
            "limited stdlib",
        ),
        descriptor(
            "csharp",
            "C# (Blazor WASM)",
            &["cs"],
            OffloadedWorker,
            ".NET 8",
            60_000,
            2048,
            Experimental,
            "Blazor WASM, limited BCL",
        ),
        descriptor(
            "kotlin",
            "Kotlin (Kotlin/WASM)",
            &["kt"],
            OffloadedWorker,
            "Kotlin/WASM",
            60_000,
            2048,
            Experimental,
            "Kotlin/WASM, very early",
        ),
        descriptor(
            "r",
            "R (WebR)",
            &["r"],
            OffloadedWorker,
            "WebR",
            60_000,
            1024,
            Experimental,
            "large runtime asset",
        ),
        descriptor(
            "html",
            "HTML",
            &["html", "htm"],
            SandboxedDocument,
            "HTML5",
            10_000,
            256,
            Full,
            "rendered in a sandboxed document",
        ),
        descriptor(
            "css",
            "CSS",
            &["css"],
            Inline,
            "CSS3",
            1_000,
            0,
            Full,
            "structural validation only",
        ),
        descriptor(
            "json",
            "JSON",
            &["json"],
            Inline,
            "JSON",
            1_000,
            0,
            Full,
            "parse and format",
        ),
    ]
}

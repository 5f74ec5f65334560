//! Service constants and the sandbox descriptor.

use std::time::Duration;

/// Toolchain image the sandbox runs. Must ship `go` and `gofmt`.
pub const DEFAULT_IMAGE: &str = "golang:1.22-alpine";

/// Logical name of the single sandbox container.
pub const DEFAULT_CONTAINER_NAME: &str = "gopad-sandbox";

/// Container memory ceiling in bytes. Swap is pinned to the same value so
/// the program cannot page its way past the cap.
pub const DEFAULT_MEMORY_LIMIT: i64 = 150 * 1024 * 1024;

/// One CPU equivalent.
pub const DEFAULT_NANO_CPUS: i64 = 1_000_000_000;

/// Process-count ceiling inside the container.
pub const DEFAULT_PIDS_LIMIT: i64 = 100;

/// Working directory inside the container where source is staged.
pub const WORK_DIR: &str = "/code";

/// Fixed name of the staged source file.
pub const SOURCE_FILE: &str = "main.go";

/// Maximum accepted submission size in bytes.
pub const MAX_CODE_SIZE: usize = 1024 * 1024;

/// Deadline for one submission, spanning compile and run.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a caller-supplied stdin line waits to be accepted by the
/// running coordinator before the request times out.
pub const INPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Structural cap on `func` keyword occurrences.
pub const MAX_FUNCTION_COUNT: usize = 50;

/// Structural cap on `for` keyword occurrences.
pub const MAX_LOOP_COUNT: usize = 30;

/// Ordered rejection patterns applied to raw submission text. A coarse
/// blocklist, not a sound analysis; the container is the real isolation
/// boundary.
pub const DISALLOWED_PATTERNS: &[&str] = &[
    r#"import\s+"os/exec""#,
    r#"import\s+"net/http""#,
    r#"import\s+"syscall""#,
    r#"import\s+"unsafe""#,
    r#"import\s+"debug/.*""#,
    r#"import\s+"plugin""#,
    r#"import\s+"runtime/debug""#,
    r"\bos\.Exec\b",
    r"\bos\.Setenv\b",
    r"\bos\.Remove\b",
    r"\bos\.Chmod\b",
    r"\bfile\.\w+\b",
    r"\bsyscall\.\w+\b",
    r"\bunsafe\.\w+\b",
    r"\bexec\.\w+\b",
    r"\bnet\.\w+\b",
    r"\bdebug\.\w+\b",
    r"\bplugin\.\w+\b",
    r"\bmake\(\w+,\s*\d+\)",
];

/// Immutable configuration for the sandbox container.
///
/// The live container identifier is not part of the descriptor; it is set on
/// the [`crate::Sandbox`] once `ensure` succeeds.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Logical container name used for adoption across restarts.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Memory ceiling in bytes (swap is pinned to the same value).
    pub memory_limit: i64,
    /// CPU share in units of 1e-9 CPUs.
    pub nano_cpus: i64,
    /// Process-count ceiling.
    pub pids_limit: i64,
    /// Working directory for staging and execs.
    pub work_dir: String,
    /// Environment for the inner toolchain.
    pub env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTAINER_NAME.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            nano_cpus: DEFAULT_NANO_CPUS,
            pids_limit: DEFAULT_PIDS_LIMIT,
            work_dir: WORK_DIR.to_string(),
            env: vec![
                "GOMEMLIMIT=50MiB".to_string(),
                "GOGC=50".to_string(),
                "CGO_ENABLED=0".to_string(),
            ],
        }
    }
}

impl SandboxConfig {
    /// Create a descriptor with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the image reference.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the memory ceiling in bytes.
    pub fn with_memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the CPU share in nano-CPUs.
    pub fn with_nano_cpus(mut self, nano_cpus: i64) -> Self {
        self.nano_cpus = nano_cpus;
        self
    }

    /// Set the process-count ceiling.
    pub fn with_pids_limit(mut self, pids_limit: i64) -> Self {
        self.pids_limit = pids_limit;
        self
    }
}

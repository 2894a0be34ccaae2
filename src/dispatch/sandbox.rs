//! Sandboxed-document strategy: an isolated rendering surface that markup
//! is injected into. Successful injection is the whole run; teardown is
//! synchronous and unconditional so the surface can never leak.

#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("document host is closed")]
    Closed,

    #[error("nothing to render: entry file is empty")]
    EmptyMarkup,
}

/// Minimal in-process stand-in for the isolated rendering surface. The
/// hosting shell swaps in a real sandboxed document; the engine only relies
/// on the open/inject/close lifecycle.
#[derive(Debug)]
pub struct DocumentHost {
    open: bool,
    rendered: Option<String>,
}

impl DocumentHost {
    pub fn open() -> Self {
        Self {
            open: true,
            rendered: None,
        }
    }

    /// Injects markup into the document. Fragments are wrapped into a full
    /// document shell, matching what the editor preview does.
    pub fn inject(&mut self, markup: &str) -> Result<(), SandboxError> {
        if !self.open {
            return Err(SandboxError::Closed);
        }
        if markup.trim().is_empty() {
            return Err(SandboxError::EmptyMarkup);
        }

        let document = if markup.contains("<!DOCTYPE") || markup.contains("<html") {
            markup.to_string()
        } else {
            format!(
                "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"></head>\n<body>\n{markup}\n</body>\n</html>"
            )
        };
        self.rendered = Some(document);
        Ok(())
    }

    /// Unconditional teardown; must run on both success and failure paths.
    pub fn close(&mut self) {
        self.open = false;
        self.rendered = None;
    }

    pub fn rendered_markup(&self) -> Option<&str> {
        self.rendered.as_deref()
    }
}

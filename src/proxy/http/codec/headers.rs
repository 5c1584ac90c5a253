use anyhow::{Result, anyhow, bail};
use http::header::HeaderName;

const HEADER_OVERHEAD: usize = 4; // ': ' plus CRLF

#[derive(Clone)]
pub(crate) struct Http1HeaderLine {
    lower_name: String,
    pub value: String,
}

impl Http1HeaderLine {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            lower_name: name.to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn lower_name(&self) -> &str {
        &self.lower_name
    }
}

/// Collects request header lines while enforcing a byte budget for the whole block.
pub(crate) struct Http1HeaderAccumulator {
    max_bytes: usize,
    consumed: usize,
    headers: Vec<Http1HeaderLine>,
}

impl Http1HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            consumed: 0,
            headers: Vec::new(),
        }
    }

    /// Records one raw header line. Returns `false` once the terminating blank line is seen.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        let line_len = line.len();
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            self.reserve(line_len)?;
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            bail!("header name must not be empty");
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;
        self.reserve(name.len() + value.len() + HEADER_OVERHEAD)?;
        self.headers.push(Http1HeaderLine::new(name, value));
        Ok(true)
    }

    fn reserve(&mut self, bytes: usize) -> Result<()> {
        let next = self
            .consumed
            .checked_add(bytes)
            .ok_or_else(|| anyhow!("request headers exceed configured limit"))?;
        if next > self.max_bytes {
            bail!(
                "request headers exceed configured limit of {} bytes",
                self.max_bytes
            );
        }
        self.consumed = next;
        Ok(())
    }

    pub fn get(&self, lower_name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.lower_name() == lower_name)
            .map(|header| header.value.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.get("user-agent")
    }

    pub fn total_bytes(&self) -> usize {
        self.consumed
    }
}

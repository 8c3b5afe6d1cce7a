use std::fmt;

/// Ordered emulator arguments.
///
/// Each flag and each value is a separate token, so paths with spaces need no shell quoting.
/// Order is preserved exactly; QEMU assigns drive indices positionally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgumentList {
    tokens: Vec<String>,
}

impl ArgumentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bare flag such as `-no-reboot`.
    pub fn flag(&mut self, flag: &str) -> &mut Self {
        self.tokens.push(flag.to_string());
        self
    }

    /// Append a flag followed by its value, e.g. `-m 2048`.
    pub fn opt(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.tokens.push(flag.to_string());
        self.tokens.push(value.into());
        self
    }

    pub fn extend<I, S>(&mut self, tokens: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }

    pub fn into_vec(self) -> Vec<String> {
        self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Values following each occurrence of `flag`.
    pub fn values_of<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tokens
            .windows(2)
            .filter(move |w| w[0] == flag)
            .map(|w| w[1].as_str())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }
}

impl fmt::Display for ArgumentList {
    /// Space-separated, quoting tokens that contain whitespace. For logs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if token.is_empty() || token.chars().any(char::is_whitespace) {
                write!(f, "\"{token}\"")?;
            } else {
                f.write_str(token)?;
            }
        }
        Ok(())
    }
}

/// Escape a value embedded in a comma-separated QEMU option list.
pub fn escape_opt_value(value: &str) -> String {
    value.replace(',', ",,")
}

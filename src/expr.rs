//! Redirect location expressions.
//!
//! A location is a string template in which `%{VAR}` is replaced with a value
//! taken from the request, e.g.
//! `https://example.com/blocked.html?ip=%{REMOTE_ADDR}`.

use crate::request::GateRequest;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Error produced when parsing or evaluating a location expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("unterminated variable reference at offset {0}")]
    Unterminated(usize),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("request header '{0}' is not present")]
    MissingHeader(String),
    #[error("expression evaluated to an empty string")]
    EmptyResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Variable {
    RemoteAddr,
    RequestUri,
    QueryString,
    RequestMethod,
    HttpHost,
    HttpUserAgent,
    HttpReferer,
    ServerName,
    Header(String),
}

impl Variable {
    fn parse(name: &str) -> Result<Self, ExprError> {
        if let Some(header) = name.strip_prefix("HTTP:") {
            if header.is_empty() {
                return Err(ExprError::UnknownVariable(name.to_string()));
            }
            return Ok(Variable::Header(header.to_string()));
        }

        match name {
            "REMOTE_ADDR" => Ok(Variable::RemoteAddr),
            "REQUEST_URI" => Ok(Variable::RequestUri),
            "QUERY_STRING" => Ok(Variable::QueryString),
            "REQUEST_METHOD" => Ok(Variable::RequestMethod),
            "HTTP_HOST" => Ok(Variable::HttpHost),
            "HTTP_USER_AGENT" => Ok(Variable::HttpUserAgent),
            "HTTP_REFERER" => Ok(Variable::HttpReferer),
            "SERVER_NAME" => Ok(Variable::ServerName),
            other => Err(ExprError::UnknownVariable(other.to_string())),
        }
    }

    fn resolve(&self, request: &GateRequest) -> Result<String, ExprError> {
        let value = match self {
            Variable::RemoteAddr => request.client_ip().to_string(),
            Variable::RequestUri => request.path().to_string(),
            Variable::QueryString => request.query().unwrap_or_default().to_string(),
            Variable::RequestMethod => request.method().to_string(),
            Variable::HttpHost => request.host().unwrap_or_default().to_string(),
            Variable::HttpUserAgent => request.header("user-agent").unwrap_or_default().to_string(),
            Variable::HttpReferer => request.header("referer").unwrap_or_default().to_string(),
            Variable::ServerName => request.server_name().unwrap_or_default(),
            Variable::Header(name) => request
                .header(name)
                .ok_or_else(|| ExprError::MissingHeader(name.clone()))?
                .to_string(),
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Variable),
}

/// A compiled location expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationExpr {
    source: String,
    segments: Vec<Segment>,
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%\{([^}]*)\}").expect("valid variable pattern"))
}

impl LocationExpr {
    /// Parse an expression. Unknown variables are rejected here, not at
    /// request time.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.trim().is_empty() {
            return Err(ExprError::Empty);
        }

        let mut segments = Vec::new();
        let mut last = 0;

        for cap in variable_pattern().captures_iter(source) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            push_literal(&mut segments, source, last, whole.start())?;
            segments.push(Segment::Var(Variable::parse(name.as_str())?));
            last = whole.end();
        }
        push_literal(&mut segments, source, last, source.len())?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Evaluate the expression against a request.
    pub fn evaluate(&self, request: &GateRequest) -> Result<String, ExprError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(var) => out.push_str(&var.resolve(request)?),
            }
        }

        if out.trim().is_empty() {
            return Err(ExprError::EmptyResult);
        }
        Ok(out)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn push_literal(
    segments: &mut Vec<Segment>,
    source: &str,
    start: usize,
    end: usize,
) -> Result<(), ExprError> {
    let text = &source[start..end];
    if let Some(pos) = text.find("%{") {
        return Err(ExprError::Unterminated(start + pos));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

impl FromStr for LocationExpr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LocationExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GateRequest {
        GateRequest::new("198.51.100.9", "/shop/cart")
            .with_query("id=3")
            .with_host("www.example.com:8443")
            .with_header("User-Agent", "curl/8.0")
    }

    #[test]
    fn test_literal_only() {
        let expr = LocationExpr::parse("/you-are-blocked.html").unwrap();
        assert_eq!(expr.evaluate(&request()).unwrap(), "/you-are-blocked.html");
    }

    #[test]
    fn test_remote_addr_substitution() {
        let expr =
            LocationExpr::parse("https://somewhere.example.com/blocked.html?ip=%{REMOTE_ADDR}")
                .unwrap();
        assert_eq!(
            expr.evaluate(&request()).unwrap(),
            "https://somewhere.example.com/blocked.html?ip=198.51.100.9"
        );
    }

    #[test]
    fn test_multiple_variables() {
        let expr = LocationExpr::parse(
            "https://%{SERVER_NAME}/blocked?from=%{REQUEST_URI}&q=%{QUERY_STRING}&m=%{REQUEST_METHOD}",
        )
        .unwrap();
        assert_eq!(
            expr.evaluate(&request()).unwrap(),
            "https://www.example.com/blocked?from=/shop/cart&q=id=3&m=GET"
        );
    }

    #[test]
    fn test_header_variable() {
        let expr = LocationExpr::parse("/blocked?ua=%{HTTP:User-Agent}").unwrap();
        assert_eq!(expr.evaluate(&request()).unwrap(), "/blocked?ua=curl/8.0");
    }

    #[test]
    fn test_missing_header_fails_evaluation() {
        let expr = LocationExpr::parse("/blocked?t=%{HTTP:X-Tenant}").unwrap();
        assert_eq!(
            expr.evaluate(&request()),
            Err(ExprError::MissingHeader("X-Tenant".to_string()))
        );
    }

    #[test]
    fn test_empty_result_fails_evaluation() {
        let expr = LocationExpr::parse("%{HTTP_REFERER}").unwrap();
        assert_eq!(expr.evaluate(&request()), Err(ExprError::EmptyResult));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        assert_eq!(
            LocationExpr::parse("/x?%{NOPE}"),
            Err(ExprError::UnknownVariable("NOPE".to_string()))
        );
        assert!(LocationExpr::parse("/x?%{HTTP:}").is_err());
    }

    #[test]
    fn test_unterminated_rejected() {
        assert_eq!(
            LocationExpr::parse("/x?ip=%{REMOTE_ADDR"),
            Err(ExprError::Unterminated(6))
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(LocationExpr::parse("  "), Err(ExprError::Empty));
    }

    #[test]
    fn test_plain_percent_is_literal() {
        let expr = LocationExpr::parse("/blocked?pct=100%").unwrap();
        assert_eq!(expr.evaluate(&request()).unwrap(), "/blocked?pct=100%");
    }
}

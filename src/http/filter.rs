//! Request and response filters.
//!
//! Ingress filters see the request context before the application and may
//! rewrite it. Egress filters see each simple-mode response afterwards and
//! may replace it. Both run inside the application's error boundary, so a
//! failing filter is reported like a failing application.

use crate::http::app::AppError;
use crate::http::request::Environ;
use crate::http::response::Response;

pub trait Ingress: Send + Sync {
    fn filter(&self, environ: &mut Environ) -> Result<(), AppError>;
}

pub trait Egress: Send + Sync {
    fn filter(&self, environ: &Environ, response: Response) -> Result<Response, AppError>;
}

impl<F> Ingress for F
where
    F: Fn(&mut Environ) -> Result<(), AppError> + Send + Sync,
{
    fn filter(&self, environ: &mut Environ) -> Result<(), AppError> {
        self(environ)
    }
}

impl<F> Egress for F
where
    F: Fn(&Environ, Response) -> Result<Response, AppError> + Send + Sync,
{
    fn filter(&self, environ: &Environ, response: Response) -> Result<Response, AppError> {
        self(environ, response)
    }
}

/// Strips a fixed prefix from `PATH_INFO` into `SCRIPT_NAME`, for mounting
/// an application below a sub-path.
#[derive(Debug, Clone)]
pub struct MountPoint {
    prefix: String,
}

impl MountPoint {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Ingress for MountPoint {
    fn filter(&self, environ: &mut Environ) -> Result<(), AppError> {
        if self.prefix.is_empty() {
            return Ok(());
        }
        if let Some(rest) = environ.path_info.strip_prefix(&self.prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                environ.script_name = format!("{}{}", environ.script_name, self.prefix);
                environ.path_info = rest.to_string();
            }
        }
        Ok(())
    }
}

/// Appends a fixed header to every response that does not already carry it.
#[derive(Debug, Clone)]
pub struct DefaultHeader {
    name: String,
    value: String,
}

impl DefaultHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Egress for DefaultHeader {
    fn filter(&self, _environ: &Environ, mut response: Response) -> Result<Response, AppError> {
        let present = response
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(&self.name));
        if !present {
            response.headers.push((self.name.clone(), self.value.clone()));
        }
        Ok(response)
    }
}

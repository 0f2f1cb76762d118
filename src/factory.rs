//! The response factory: one place to build every kind of response, plus
//! application-registered macros.
//!
//! A `ResponseFactory` is built once at start-up, macros are registered on it,
//! and it is then shared (usually behind an `Arc`) with the handlers.
use crate::error::{Error, Result};
use crate::response::{
    BinaryFileResponse, Disposition, Headers, HttpResponse, JsonOptions, JsonResponse, Response,
    StreamWriter, StreamedResponse, default_header,
};
use crate::settings::Settings;
use crate::support::{Arrayable, ascii};
use crate::view::ViewFactory;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// A named response builder invoked through [`ResponseFactory::call`].
pub type Macro = Arc<dyn Fn(&[Value]) -> Result<HttpResponse> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, Macro>,
}

impl MacroRegistry {
    /// Register `callback` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, callback: Macro) {
        self.macros.insert(name.into(), callback);
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Data accepted by [`ResponseFactory::json`].
#[derive(Debug, Clone, PartialEq)]
pub struct JsonData(Value);

impl JsonData {
    /// Adapt any serializable value.
    pub fn serialize<T: Serialize + ?Sized>(data: &T) -> Result<Self> {
        Ok(JsonData(serde_json::to_value(data)?))
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for JsonData {
    fn from(value: Value) -> Self {
        JsonData(value)
    }
}

/// `Arrayable` types are encoded through their mapping form.
impl<T: Arrayable + ?Sized> From<&T> for JsonData {
    fn from(data: &T) -> Self {
        JsonData(Value::Object(data.to_array()))
    }
}

/// ASCII stand-in for a download name: transliterated, `%` and control
/// characters removed.
pub fn ascii_fallback(name: &str) -> String {
    ascii(name)
        .chars()
        .filter(|c| *c != '%' && !c.is_ascii_control())
        .collect()
}

pub struct ResponseFactory {
    views: ViewFactory,
    macros: MacroRegistry,
}

impl ResponseFactory {
    pub fn new(views: ViewFactory) -> Self {
        ResponseFactory {
            views,
            macros: MacroRegistry::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        ResponseFactory::new(ViewFactory::from_settings(&settings.template))
    }

    pub fn views(&self) -> &ViewFactory {
        &self.views
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    pub fn make(&self, content: impl Into<String>, status: u16, headers: Headers) -> HttpResponse {
        Response::new(content, status, headers).into()
    }

    /// Render the view `name` with `data` and wrap it in a basic response.
    pub fn view(&self, name: &str, data: &Value, status: u16, mut headers: Headers) -> Result<HttpResponse> {
        let content = self.views.render(name, data)?;
        default_header(&mut headers, "Content-Type", "text/html; charset=utf-8");
        Ok(self.make(content, status, headers))
    }

    pub fn json(
        &self,
        data: impl Into<JsonData>,
        status: u16,
        headers: Headers,
        options: JsonOptions,
    ) -> HttpResponse {
        JsonResponse::new(data.into().into_value(), status, headers, options).into()
    }

    /// Wrap `callback` in a streamed response. The callback runs when the
    /// response is sent, not here.
    pub fn stream<F, Fut>(&self, callback: F, status: u16, headers: Headers) -> HttpResponse
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        StreamedResponse::new(callback, status, headers).into()
    }

    /// Send `file` as a download. With a `name`, the disposition header
    /// carries that name and an ASCII fallback for older clients.
    pub fn download(
        &self,
        file: impl AsRef<Path>,
        name: Option<&str>,
        headers: Headers,
        disposition: Disposition,
    ) -> Result<HttpResponse> {
        let mut response =
            BinaryFileResponse::new(file.as_ref(), 200, headers, true, Some(disposition))?;
        if let Some(name) = name {
            response.set_content_disposition(disposition, name, &ascii_fallback(name))?;
        }
        Ok(response.into())
    }

    /// Display `file` inline in the browser.
    pub fn file(&self, file: impl AsRef<Path>, headers: Headers) -> Result<HttpResponse> {
        let response = BinaryFileResponse::new(file.as_ref(), 200, headers, true, None)?;
        Ok(response.into())
    }

    pub fn no_content(&self, status: u16, headers: Headers) -> HttpResponse {
        self.make("", status, headers)
    }

    /// Register a macro; a later registration under the same name wins.
    pub fn register_macro<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&[Value]) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        let name = name.into();
        info!("Registering response macro `{}`", name);
        self.macros.register(name, Arc::new(callback));
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.macros.contains(name)
    }

    /// Invoke the macro `name` with `args`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<HttpResponse> {
        debug!("Calling response macro `{}`", name);
        let callback = self.macros.get(name).ok_or_else(|| Error::UndefinedMethod {
            method: name.to_string(),
        })?;
        callback(args)
    }
}

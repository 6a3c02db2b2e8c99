//! Request body construction.
//!
//! Four body shapes are supported, mirroring what browsers send: a raw
//! concatenated body, a single file sent verbatim, a urlencoded form, and a
//! multipart form. Each builder also produces the `recorded` text stored on
//! the sample result so a request's body can be inspected after the fact;
//! for multipart bodies the recorded text reproduces the part headers
//! around a placeholder instead of the file bytes.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use url::Url;

use crate::sample::SampleError;

/// Placeholder stored in place of file bytes in recorded request bodies.
pub const FILE_CONTENT_PLACEHOLDER: &str = "<actual file content, not shown here>";

/// One configured request parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpArgument {
    pub name: String,
    pub value: String,
    /// When false the value is sent exactly as configured; when true it is
    /// percent-encoded on the way out.
    pub always_encoded: bool,
}

impl HttpArgument {
    pub fn new(name: &str, value: &str) -> Self {
        HttpArgument {
            name: name.to_string(),
            value: value.to_string(),
            always_encoded: true,
        }
    }
}

/// One configured file upload.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpFileArg {
    /// Local path of the file to send.
    pub path: String,
    /// Form field name; empty for a verbatim single-file body.
    pub param_name: String,
    /// MIME type sent with the file part.
    pub mime_type: String,
}

/// A fully built request body plus the text recorded on the sample result.
pub enum RequestBody {
    None,
    Bytes {
        content: Vec<u8>,
        content_type: Option<String>,
        recorded: String,
    },
    Multipart {
        form: Form,
        recorded: String,
    },
}

impl RequestBody {
    /// The recorded body text, as stored on the sample result.
    pub fn recorded(&self) -> &str {
        match self {
            RequestBody::None => "",
            RequestBody::Bytes { recorded, .. } => recorded,
            RequestBody::Multipart { recorded, .. } => recorded,
        }
    }
}

/// Concatenate argument values into one raw body, sent without any
/// encoding. Used when a single unnamed argument carries the whole body.
pub fn raw_body(arguments: &[HttpArgument], content_type: Option<&str>) -> RequestBody {
    let mut content = String::new();
    for argument in arguments {
        content.push_str(&argument.value);
    }
    RequestBody::Bytes {
        content: content.clone().into_bytes(),
        content_type: content_type.map(|c| c.to_string()),
        recorded: content,
    }
}

/// Send a single file verbatim as the request body. The recorded text is
/// the placeholder, never the file bytes.
pub async fn file_body(file: &HttpFileArg) -> Result<RequestBody, SampleError> {
    let content = tokio::fs::read(&file.path).await?;
    let content_type = if file.mime_type.is_empty() {
        None
    } else {
        Some(file.mime_type.clone())
    };
    Ok(RequestBody::Bytes {
        content,
        content_type,
        recorded: FILE_CONTENT_PLACEHOLDER.to_string(),
    })
}

/// Build an `application/x-www-form-urlencoded` body from named arguments.
/// Arguments flagged `always_encoded` are percent-encoded; others are
/// passed through as configured.
pub fn urlencoded_body(arguments: &[HttpArgument]) -> RequestBody {
    let mut pairs = Vec::with_capacity(arguments.len());
    for argument in arguments {
        let name = urlencoding::encode(&argument.name).into_owned();
        let value = if argument.always_encoded {
            urlencoding::encode(&argument.value).into_owned()
        } else {
            argument.value.clone()
        };
        pairs.push(format!("{}={}", name, value));
    }
    let content = pairs.join("&");
    RequestBody::Bytes {
        content: content.clone().into_bytes(),
        content_type: Some("application/x-www-form-urlencoded".to_string()),
        recorded: content,
    }
}

/// Append urlencoded arguments to a GET-style URL's query string.
pub fn append_query(url: &mut Url, arguments: &[HttpArgument]) {
    if arguments.is_empty() {
        return;
    }
    let mut query = url.query().unwrap_or("").to_string();
    for argument in arguments {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&urlencoding::encode(&argument.name));
        query.push('=');
        if argument.always_encoded {
            query.push_str(&urlencoding::encode(&argument.value));
        } else {
            query.push_str(&argument.value);
        }
    }
    url.set_query(Some(&query));
}

/// Build a `multipart/form-data` body from named arguments and file parts.
///
/// When `browser_compatible` is set, text parts carry no Content-Type or
/// transfer-encoding headers, matching what browsers send; otherwise each
/// text part declares `text/plain` with the supplied charset.
///
/// The recorded text reproduces the multipart framing with the actual
/// boundary, substituting [`FILE_CONTENT_PLACEHOLDER`] for file bytes.
pub async fn multipart_body(
    arguments: &[HttpArgument],
    files: &[HttpFileArg],
    charset: &str,
    browser_compatible: bool,
) -> Result<RequestBody, SampleError> {
    let mut form = Form::new();
    let boundary = form.boundary().to_string();
    let mut recorded = String::new();

    for argument in arguments {
        recorded.push_str(&format!("--{}\r\n", boundary));
        recorded.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            argument.name
        ));
        let part = if browser_compatible {
            Part::text(argument.value.clone())
        } else {
            recorded.push_str(&format!(
                "Content-Type: text/plain; charset={}\r\n",
                charset
            ));
            recorded.push_str("Content-Transfer-Encoding: 8bit\r\n");
            Part::text(argument.value.clone())
                .mime_str(&format!("text/plain; charset={}", charset))
                .map_err(SampleError::Transport)?
        };
        recorded.push_str("\r\n");
        recorded.push_str(&argument.value);
        recorded.push_str("\r\n");
        form = form.part(argument.name.clone(), part);
    }

    for file in files {
        let content = tokio::fs::read(&file.path).await?;
        let file_name = Path::new(&file.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.path.clone());
        // Non-ASCII filenames are percent-encoded on the wire.
        let encoded_name = urlencoding::encode(&file_name).into_owned();

        recorded.push_str(&format!("--{}\r\n", boundary));
        recorded.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            file.param_name, file_name
        ));
        recorded.push_str(&format!("Content-Type: {}\r\n", file.mime_type));
        recorded.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
        recorded.push_str(FILE_CONTENT_PLACEHOLDER);
        recorded.push_str("\r\n");

        let mut part = Part::bytes(content).file_name(encoded_name);
        if !file.mime_type.is_empty() {
            part = part.mime_str(&file.mime_type).map_err(SampleError::Transport)?;
        }
        form = form.part(file.param_name.clone(), part);
    }

    recorded.push_str(&format!("--{}--\r\n", boundary));

    Ok(RequestBody::Multipart { form, recorded })
}

/// Whether the configured arguments should be sent as one raw body: every
/// argument is unnamed, so there is no form structure to encode.
pub fn send_as_raw_body(arguments: &[HttpArgument]) -> bool {
    !arguments.is_empty() && arguments.iter().all(|a| a.name.is_empty())
}

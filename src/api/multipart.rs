//! `multipart/form-data` body parsing for file uploads.

use anyhow::{anyhow, Result};

use super::http::find;

#[derive(Debug)]
pub struct FormPart<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<FormPart<'a>>> {
    let delim = format!("--{boundary}").into_bytes();
    let next_delim = format!("\r\n--{boundary}").into_bytes();
    let mut pos = find(body, &delim, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?
        + delim.len();

    let mut parts = Vec::new();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart delimiter"));
        }
        pos += 2;
        let header_end =
            find(body, b"\r\n\r\n", pos).ok_or_else(|| anyhow!("unterminated part headers"))?;
        let data_start = header_end + 4;
        let data_end = find(body, &next_delim, data_start)
            .ok_or_else(|| anyhow!("unterminated multipart part"))?;

        let mut part = FormPart {
            name: None,
            filename: None,
            content_type: None,
            data: &body[data_start..data_end],
        };
        let headers = String::from_utf8_lossy(&body[pos..header_end]);
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            if key == "content-disposition" {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.trim().split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim().to_lowercase().as_str() {
                            "name" => part.name = Some(v),
                            "filename" => part.filename = Some(v),
                            _ => {}
                        }
                    }
                }
            } else if key == "content-type" {
                part.content_type = Some(value.trim().to_string());
            }
        }
        parts.push(part);
        pos = data_end + next_delim.len();
    }
    Ok(parts)
}

/// The uploaded file: the part named `file`, else the first part carrying a filename.
pub fn file_part<'a, 'b>(parts: &'b [FormPart<'a>]) -> Option<&'b FormPart<'a>> {
    parts
        .iter()
        .find(|p| p.name.as_deref() == Some("file"))
        .or_else(|| parts.iter().find(|p| p.filename.is_some()))
}

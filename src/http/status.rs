//! Status codes, reason phrases and the standard error page.

pub const OK: u16 = 200;
pub const MOVED_PERMANENTLY: u16 = 301;
pub const NOT_MODIFIED: u16 = 304;
pub const BAD_REQUEST: u16 = 400;
pub const FORBIDDEN: u16 = 403;
pub const NOT_FOUND: u16 = 404;
pub const LENGTH_REQUIRED: u16 = 411;
pub const PAYLOAD_TOO_LARGE: u16 = 413;
pub const HEADERS_TOO_LARGE: u16 = 431;
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Reason phrase for a status code.
pub fn reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Time-out",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        418 => "I'm a Teapot",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Time-out",
        505 => "HTTP Version not supported",
        506 => "CSRF token missing",
        507 => "CSRF failed",
        _ => "Unknown",
    }
}

/// Responses that never carry a message body.
pub fn is_bodyless(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == NOT_MODIFIED
}

/// Body of [`Request::error`](crate::http::Request::error) replies.
pub fn error_page(code: u16) -> String {
    let code_line = format!("<p>Error code {}.</p>", code);
    let message_line = format!("<p>Message: {}.</p>", reason(code));
    [
        "<html><head>",
        "<title>Error response</title>",
        "</head>",
        "<body>",
        "<h1>Error response</h1>",
        code_line.as_str(),
        message_line.as_str(),
        "</body></html>",
        "",
    ]
    .join("\r\n")
}

/// Minimal HTML escaping for text interpolated into error pages.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

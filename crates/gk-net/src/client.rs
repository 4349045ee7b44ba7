//! HTTP/1.1 client over pooled, optionally TLS-wrapped origin connections.

use crate::PreparedRequest;
use crate::connect::BoxedIoStream;
use crate::connect::Connector;
use crate::connect::TcpConnector;
use crate::http::Header;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::http::header_contains;
use crate::pool::ConnectionKey;
use crate::pool::ConnectionPool;
use crate::pool::InMemoryConnectionPool;
use crate::tls::TlsPolicy;
use crate::tls_backend::RustlsTlsAdapter;
use crate::tls_backend::TlsBackendAdapter;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use gk_core::RelayError;
use gk_core::RelayResult;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
/// Upper bound on a response body, both as framed on the wire and after
/// content decoding.
const MAX_RESPONSE_BODY_BYTES: usize = 32 * 1024 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;

/// Anything that can turn a prepared request into a complete response.
///
/// The fetcher is written against this seam so redirect and cache handling
/// can be exercised without sockets.
pub trait RequestExecutor: Send + Sync {
    fn execute(&self, prepared: PreparedRequest) -> RelayResult<HttpResponse>;
}

/// HTTP/1.1 client with pluggable connector, pool and TLS backend.
pub struct Http11Client<C = TcpConnector, P = InMemoryConnectionPool, A = RustlsTlsAdapter>
where
    C: Connector,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    connector: C,
    pool: P,
    tls_adapter: A,
    tls_policy: TlsPolicy,
    connect_timeout: Duration,
}

impl Http11Client {
    pub fn new(tls_policy: TlsPolicy) -> RelayResult<Self> {
        Self::with_parts(
            TcpConnector,
            InMemoryConnectionPool::default(),
            RustlsTlsAdapter,
            tls_policy,
        )
    }
}

impl<C, P, A> Http11Client<C, P, A>
where
    C: Connector,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    pub fn with_parts(
        connector: C,
        pool: P,
        tls_adapter: A,
        tls_policy: TlsPolicy,
    ) -> RelayResult<Self> {
        tls_policy.validate()?;
        Ok(Self {
            connector,
            pool,
            tls_adapter,
            tls_policy,
            connect_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn send(&self, prepared: &PreparedRequest) -> RelayResult<HttpResponse> {
        validate_prepared_request(prepared)?;

        let key = ConnectionKey::from_url(&prepared.request.url);

        // A pooled connection may have been closed by the origin while idle;
        // one failed attempt on it falls through to a fresh connection.
        if let Some(mut stream) = self.pool.checkout(&key) {
            match exchange(&mut stream, &prepared.request) {
                Ok(outcome) => return Ok(self.finish(key, stream, outcome)),
                Err(error) => {
                    tracing::debug!(
                        code = error.code,
                        host = prepared.request.url.host(),
                        "pooled connection failed, reconnecting"
                    );
                }
            }
        }

        let mut stream = self.open_stream(prepared)?;
        let outcome = exchange(&mut stream, &prepared.request)?;
        Ok(self.finish(key, stream, outcome))
    }

    fn finish(
        &self,
        key: ConnectionKey,
        stream: BoxedIoStream,
        outcome: ResponseReadOutcome,
    ) -> HttpResponse {
        if outcome.reusable {
            self.pool.checkin(key, stream);
        }
        outcome.response
    }

    fn open_stream(&self, prepared: &PreparedRequest) -> RelayResult<BoxedIoStream> {
        let url = &prepared.request.url;
        let stream = self
            .connector
            .connect(url.host(), url.port(), self.connect_timeout)?;

        match &prepared.tls {
            Some(handshake) => self
                .tls_adapter
                .connect_tls(stream, handshake, &self.tls_policy),
            None => Ok(Box::new(stream)),
        }
    }
}

impl<C, P, A> RequestExecutor for Http11Client<C, P, A>
where
    C: Connector,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    fn execute(&self, prepared: PreparedRequest) -> RelayResult<HttpResponse> {
        self.send(&prepared)
    }
}

fn exchange(stream: &mut BoxedIoStream, request: &HttpRequest) -> RelayResult<ResponseReadOutcome> {
    write_request(stream, request)?;
    read_response(stream, request)
}

fn validate_prepared_request(prepared: &PreparedRequest) -> RelayResult<()> {
    if prepared.request.url.is_secure() && prepared.tls.is_none() {
        return Err(RelayError::new(
            "net.http.tls_missing",
            "HTTPS request is missing TLS handshake configuration",
        ));
    }

    if !prepared.request.url.is_secure() && prepared.tls.is_some() {
        return Err(RelayError::new(
            "net.http.tls_unexpected",
            "non-HTTPS request must not include TLS handshake configuration",
        ));
    }

    Ok(())
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> RelayResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(request.method.as_str().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.request_target().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.version.as_str().as_bytes());
    encoded.extend_from_slice(b"\r\n");

    for header in &request.headers {
        encoded.extend_from_slice(header.name.as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(header.value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }
    encoded.extend_from_slice(b"\r\n");

    stream.write_all(&encoded).map_err(|error| {
        RelayError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        RelayError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })?;

    Ok(())
}

struct ResponseReadOutcome {
    response: HttpResponse,
    reusable: bool,
}

fn read_response(stream: &mut dyn Read, request: &HttpRequest) -> RelayResult<ResponseReadOutcome> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let mut header_end: Option<usize> = None;

    while header_end.is_none() {
        let read = stream.read(&mut chunk).map_err(|error| {
            RelayError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(RelayError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(RelayError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }

        header_end = find_header_end(&buffer);
    }

    let header_end = match header_end {
        Some(value) => value,
        None => {
            return Err(RelayError::new(
                "net.http.header_terminator_missing",
                "response head terminator not found",
            ));
        }
    };

    let head_bytes = &buffer[..header_end];
    let mut body_bytes = buffer[header_end..].to_vec();
    // Header values are opaque bytes on the wire; Latin-1 maps each one to a char.
    let head_text: String = head_bytes.iter().map(|byte| char::from(*byte)).collect();

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        RelayError::new("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let (version, status) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            RelayError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let has_transfer_encoding = headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let has_chunked_transfer = header_contains(&headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(RelayError::new(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is supported",
        ));
    }

    let content_length = if has_chunked_transfer {
        None
    } else {
        parse_content_length(&headers)?
    };
    let has_no_body = status_disallows_body(status.as_u16());

    let reusable = if has_no_body {
        true
    } else if has_chunked_transfer {
        body_bytes = read_chunked_body(stream, body_bytes)?;
        true
    } else if let Some(len) = content_length {
        if len > MAX_RESPONSE_BODY_BYTES {
            return Err(body_too_large(MAX_RESPONSE_BODY_BYTES));
        }
        if body_bytes.len() < len {
            let remaining = len - body_bytes.len();
            let mut rest = vec![0_u8; remaining];
            stream.read_exact(&mut rest).map_err(|error| {
                RelayError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body_bytes.extend_from_slice(&rest);
        } else if body_bytes.len() > len {
            body_bytes.truncate(len);
        }

        true
    } else {
        // No framing: the body runs until the origin closes the connection.
        read_to_end_capped(stream, &mut body_bytes, MAX_RESPONSE_BODY_BYTES)?;
        false
    };

    if !has_no_body {
        body_bytes = decode_content_encoding(&headers, &body_bytes)?;
    }

    let response = HttpResponse {
        version,
        status,
        headers,
        body: if has_no_body { Vec::new() } else { body_bytes },
    };

    Ok(ResponseReadOutcome {
        reusable: reusable && is_keep_alive(request, &response),
        response,
    })
}

struct PrefixedStreamReader<'a> {
    prefetched: Vec<u8>,
    offset: usize,
    stream: &'a mut dyn Read,
}

impl<'a> PrefixedStreamReader<'a> {
    fn new(stream: &'a mut dyn Read, prefetched: Vec<u8>) -> Self {
        Self {
            prefetched,
            offset: 0,
            stream,
        }
    }

    fn read_exact_into(
        &mut self,
        out: &mut [u8],
        code: &'static str,
        detail: &str,
    ) -> RelayResult<()> {
        let available = self.prefetched.len().saturating_sub(self.offset);
        let prefix_take = available.min(out.len());

        if prefix_take > 0 {
            out[..prefix_take]
                .copy_from_slice(&self.prefetched[self.offset..self.offset + prefix_take]);
            self.offset += prefix_take;
        }

        if prefix_take < out.len() {
            self.stream
                .read_exact(&mut out[prefix_take..])
                .map_err(|error| RelayError::new(code, format!("{detail}: {error}")))?;
        }

        Ok(())
    }
}

fn body_too_large(limit: usize) -> RelayError {
    RelayError::new(
        "net.http.body_too_large",
        format!("HTTP response body exceeds {limit} bytes"),
    )
}

fn read_to_end_capped(stream: &mut dyn Read, out: &mut Vec<u8>, limit: usize) -> RelayResult<()> {
    let allowance = limit.saturating_sub(out.len()) as u64 + 1;
    (&mut *stream)
        .take(allowance)
        .read_to_end(out)
        .map_err(|error| {
            RelayError::new(
                "net.http.read_body_failed",
                format!("failed while draining close-delimited response body: {error}"),
            )
        })?;
    if out.len() > limit {
        return Err(body_too_large(limit));
    }
    Ok(())
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> RelayResult<Vec<u8>> {
    let mut reader = PrefixedStreamReader::new(stream, prefetched);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            RelayError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            drain_chunk_trailers(&mut reader)?;
            break;
        }

        let start = decoded.len();
        if chunk_size > MAX_RESPONSE_BODY_BYTES.saturating_sub(start) {
            return Err(body_too_large(MAX_RESPONSE_BODY_BYTES));
        }
        decoded.resize(start + chunk_size, 0);
        reader.read_exact_into(
            &mut decoded[start..],
            "net.http.read_body_failed",
            "failed while reading chunked HTTP body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        reader.read_exact_into(
            &mut terminator,
            "net.http.read_body_failed",
            "failed while reading chunked body terminator",
        )?;
        if terminator != *b"\r\n" {
            return Err(RelayError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn drain_chunk_trailers(reader: &mut PrefixedStreamReader<'_>) -> RelayResult<()> {
    loop {
        let line = read_crlf_line(reader)?;
        if line.is_empty() {
            break;
        }

        if line.split_once(':').is_none() {
            return Err(RelayError::new(
                "net.http.chunk_trailer_invalid",
                format!("invalid chunk trailer line `{line}`"),
            ));
        }
    }

    Ok(())
}

fn read_crlf_line(reader: &mut PrefixedStreamReader<'_>) -> RelayResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact_into(
            &mut byte,
            "net.http.read_body_failed",
            "failed while reading chunked transfer line",
        )?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(RelayError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.len() >= 2 && line[line.len() - 2..] == *b"\r\n" {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                RelayError::new(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> RelayResult<(HttpVersion, HttpStatusCode)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(|| {
        RelayError::new(
            "net.http.status_line_invalid",
            format!("missing HTTP version in status line `{line}`"),
        )
    })?;

    let code_text = parts.next().ok_or_else(|| {
        RelayError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;

    let version = match version {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => {
            return Err(RelayError::new(
                "net.http.version_unsupported",
                format!("unsupported response version `{other}`"),
            ));
        }
    };

    let code_value = code_text.parse::<u16>().map_err(|error| {
        RelayError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    let code = HttpStatusCode::new(code_value)?;
    Ok((version, code))
}

fn parse_content_length(headers: &[Header]) -> RelayResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = header.value.trim().parse::<usize>().map_err(|error| {
                RelayError::new(
                    "net.http.content_length_invalid",
                    format!("invalid Content-Length `{}`: {error}", header.value),
                )
            })?;

            if let Some(existing) = value {
                if existing != parsed {
                    return Err(RelayError::new(
                        "net.http.content_length_conflict",
                        "conflicting Content-Length headers in response",
                    ));
                }
            } else {
                value = Some(parsed);
            }
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn is_keep_alive(request: &HttpRequest, response: &HttpResponse) -> bool {
    if request
        .header("Connection")
        .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    {
        return false;
    }

    if header_contains(&response.headers, "connection", "close") {
        return false;
    }

    match response.version {
        HttpVersion::Http10 => header_contains(&response.headers, "connection", "keep-alive"),
        HttpVersion::Http11 => true,
    }
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> RelayResult<Vec<u8>> {
    let encodings = content_encodings(headers);
    if encodings.is_empty() {
        return Ok(body.to_vec());
    }

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => decode_gzip(&decoded, MAX_RESPONSE_BODY_BYTES)?,
            "deflate" => decode_deflate(&decoded, MAX_RESPONSE_BODY_BYTES)?,
            "br" => decode_brotli(&decoded, MAX_RESPONSE_BODY_BYTES)?,
            _ => {
                return Err(RelayError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn content_encodings(headers: &[Header]) -> Vec<String> {
    headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn read_decoded(decoder: impl Read, limit: usize, format: &str) -> RelayResult<Vec<u8>> {
    let mut decoded = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|error| {
            RelayError::new(
                "net.http.decode_failed",
                format!("{format} decode failed: {error}"),
            )
        })?;
    if decoded.len() > limit {
        return Err(body_too_large(limit));
    }
    Ok(decoded)
}

fn decode_gzip(body: &[u8], limit: usize) -> RelayResult<Vec<u8>> {
    read_decoded(GzDecoder::new(Cursor::new(body)), limit, "gzip")
}

fn decode_deflate(body: &[u8], limit: usize) -> RelayResult<Vec<u8>> {
    match read_decoded(ZlibDecoder::new(Cursor::new(body)), limit, "zlib") {
        Ok(decoded) => Ok(decoded),
        Err(error) if error.code == "net.http.body_too_large" => Err(error),
        // Some servers send raw deflate streams without the zlib wrapper.
        Err(_) => read_decoded(DeflateDecoder::new(Cursor::new(body)), limit, "deflate"),
    }
}

fn decode_brotli(body: &[u8], limit: usize) -> RelayResult<Vec<u8>> {
    read_decoded(Decompressor::new(Cursor::new(body), 4096), limit, "brotli")
}

#[cfg(test)]
mod tests {
    use super::Http11Client;
    use super::RequestExecutor;
    use super::decode_content_encoding;
    use super::decode_gzip;
    use super::find_header_end;
    use super::parse_status_line;
    use super::read_chunked_body;
    use super::read_response;
    use super::read_to_end_capped;
    use super::status_disallows_body;
    use crate::NetStack;
    use crate::connect::Connector;
    use crate::connect::TcpConnector;
    use crate::http::Header;
    use crate::http::HttpMethod;
    use crate::http::HttpRequest;
    use crate::pool::InMemoryConnectionPool;
    use crate::tls::TlsPolicy;
    use crate::tls_backend::RustlsTlsAdapter;
    use crate::url::TargetUrl;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use gk_core::RelayResult;
    use std::io::Cursor;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;
    use std::net::TcpStream;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn get_request(input: &str) -> HttpRequest {
        let url = match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        match HttpRequest::builder(HttpMethod::Get, url).build() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn encoding_header(value: &str) -> Header {
        match Header::new("Content-Encoding", value) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn header_terminator_is_detected() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(find_header_end(data), Some(data.len()));
    }

    #[test]
    fn status_line_parser_accepts_http_1x_only() {
        assert!(parse_status_line("HTTP/1.1 200 OK").is_ok());
        assert!(parse_status_line("HTTP/1.0 404 Not Found").is_ok());
        assert!(parse_status_line("HTTP/2 200").is_err());
        assert!(parse_status_line("HTTP/1.1 abc OK").is_err());
    }

    #[test]
    fn detects_bodyless_status_codes() {
        assert!(status_disallows_body(101));
        assert!(status_disallows_body(204));
        assert!(status_disallows_body(304));
        assert!(!status_disallows_body(200));
    }

    #[test]
    fn decodes_chunked_body() {
        let prefetched = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched);
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let prefetched = b"Z\r\nx\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched);
        assert!(decoded.is_err_and(|error| error.code == "net.http.chunk_size_invalid"));
    }

    #[test]
    fn read_response_handles_chunked_transfer_encoding() {
        let request = get_request("https://example.com/chunked");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.body, b"Wikipedia");
        assert!(outcome.reusable);
    }

    #[test]
    fn http10_response_is_not_reused_without_keep_alive() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.status.as_u16(), 200);
        assert_eq!(outcome.response.body, b"ok");
        assert!(!outcome.reusable);
    }

    #[test]
    fn unframed_body_is_read_until_close() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>tail</p>";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.body, b"<p>tail</p>");
        assert!(!outcome.reusable);
    }

    #[test]
    fn latin1_header_bytes_are_tolerated() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.1 200 OK\r\nX-Title: caf\xe9\r\nContent-Length: 0\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.header("x-title"), Some("caf\u{e9}"));
    }

    #[test]
    fn not_modified_response_has_no_body() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.status.as_u16(), 304);
        assert!(outcome.response.body.is_empty());
        assert!(outcome.reusable);
    }

    #[test]
    fn rejects_unsupported_transfer_encoding() {
        let request = get_request("https://example.com/unsupported-te");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\nConnection: close\r\n\r\nbody";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = read_response(&mut stream, &request);
        assert!(
            outcome.is_err_and(|error| error.code == "net.http.transfer_encoding_unsupported")
        );
    }

    #[test]
    fn decodes_gzip_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut encoded, Compression::default());
            assert!(encoder.write_all(b"hello gzip").is_ok());
            assert!(encoder.finish().is_ok());
        }

        let decoded = decode_content_encoding(&[encoding_header("gzip")], &encoded);
        assert_eq!(decoded, Ok(b"hello gzip".to_vec()));
    }

    #[test]
    fn decoded_output_is_capped() {
        let mut encoded = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut encoded, Compression::best());
            assert!(encoder.write_all(&[0_u8; 4096]).is_ok());
            assert!(encoder.finish().is_ok());
        }

        let error = match decode_gzip(&encoded, 1024) {
            Ok(body) => panic!("expected an error, decoded {} bytes", body.len()),
            Err(error) => error,
        };
        assert_eq!(error.code, "net.http.body_too_large");
        assert_eq!(decode_gzip(&encoded, 4096).map(|body| body.len()), Ok(4096));
    }

    #[test]
    fn oversized_framing_is_refused_before_reading() {
        let request = get_request("http://example.com/");
        let heads: [&[u8]; 2] = [
            b"HTTP/1.1 200 OK\r\nContent-Length: 999999999999\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n7FFFFFFF\r\n",
        ];
        for raw in heads {
            let mut stream = Cursor::new(raw.to_vec());
            let error = match read_response(&mut stream, &request) {
                Ok(_) => panic!("expected an oversized body to be refused"),
                Err(error) => error,
            };
            assert_eq!(error.code, "net.http.body_too_large");
        }
    }

    #[test]
    fn close_delimited_body_is_capped() {
        let mut body = b"abc".to_vec();
        let mut stream = Cursor::new(vec![b'x'; 64]);
        let error = match read_to_end_capped(&mut stream, &mut body, 32) {
            Ok(()) => panic!("expected the cap to trip"),
            Err(error) => error,
        };
        assert_eq!(error.code, "net.http.body_too_large");

        let mut body = b"abc".to_vec();
        let mut stream = Cursor::new(vec![b'x'; 29]);
        assert!(read_to_end_capped(&mut stream, &mut body, 32).is_ok());
        assert_eq!(body.len(), 32);
    }

    #[test]
    fn decodes_deflate_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut encoded, Compression::default());
            assert!(encoder.write_all(b"hello deflate").is_ok());
            assert!(encoder.finish().is_ok());
        }

        let decoded = decode_content_encoding(&[encoding_header("deflate")], &encoded);
        assert_eq!(decoded, Ok(b"hello deflate".to_vec()));
    }

    #[test]
    fn decodes_brotli_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut encoded, 4096, 5, 22);
            assert!(writer.write_all(b"hello br").is_ok());
            assert!(writer.flush().is_ok());
        }

        let decoded = decode_content_encoding(&[encoding_header("br")], &encoded);
        assert_eq!(decoded, Ok(b"hello br".to_vec()));
    }

    #[test]
    fn unknown_content_encoding_is_rejected() {
        let decoded = decode_content_encoding(&[encoding_header("zstd")], b"abc");
        assert!(decoded.is_err_and(|error| error.code == "net.http.content_encoding_unsupported"));
    }

    #[test]
    fn executes_against_local_origin_and_reuses_connection() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };

        // One connection, two keep-alive exchanges.
        let origin = thread::spawn(move || {
            let (mut socket, _) = match listener.accept() {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            let mut requests = Vec::new();
            for body in ["first", "second"] {
                let mut head = Vec::new();
                let mut byte = [0_u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match socket.read(&mut byte) {
                        Ok(0) => break,
                        Ok(_) => head.push(byte[0]),
                        Err(error) => panic!("{error}"),
                    }
                }
                requests.push(String::from_utf8_lossy(&head).into_owned());
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                if let Err(error) = socket.write_all(reply.as_bytes()) {
                    panic!("{error}");
                }
            }
            requests
        });

        let stack = NetStack::default();
        let client = match stack.http11_client() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let url = format!("http://127.0.0.1:{port}/page?q=1");

        for expected in [b"first".as_slice(), b"second".as_slice()] {
            let target = match TargetUrl::parse(&url) {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            let prepared = match stack.prepare_get(&target) {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            let response = match client.execute(prepared) {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            assert_eq!(response.body, expected);
        }

        let requests = match origin.join() {
            Ok(value) => value,
            Err(_) => panic!("origin thread panicked"),
        };
        assert!(requests[0].starts_with("GET /page?q=1 HTTP/1.1\r\n"));
        assert!(requests[0].contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        // The origin accepts a single connection, so both answers prove reuse.
        assert_eq!(requests.len(), 2);
    }

    struct LoopbackConnector {
        port: u16,
        dialed: Mutex<Vec<(String, u16)>>,
    }

    impl Connector for LoopbackConnector {
        fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<TcpStream> {
            if let Ok(mut dialed) = self.dialed.lock() {
                dialed.push((host.to_owned(), port));
            }
            TcpConnector.connect("127.0.0.1", self.port, timeout)
        }
    }

    #[test]
    fn custom_connector_chooses_the_socket() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };
        let origin = thread::spawn(move || {
            let (mut socket, _) = match listener.accept() {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            let mut byte = [0_u8; 1];
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                match socket.read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => head.push(byte[0]),
                    Err(error) => panic!("{error}"),
                }
            }
            let reply = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nvia loopback";
            if let Err(error) = socket.write_all(reply) {
                panic!("{error}");
            }
        });

        let connector = LoopbackConnector {
            port,
            dialed: Mutex::new(Vec::new()),
        };
        let client = match Http11Client::with_parts(
            connector,
            InMemoryConnectionPool::default(),
            RustlsTlsAdapter,
            TlsPolicy::default(),
        ) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let stack = NetStack::default();
        let target = match TargetUrl::parse("http://origin.test/x") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let prepared = match stack.prepare_get(&target) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let response = match client.execute(prepared) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.body, b"via loopback");
        assert!(origin.join().is_ok());

        let dialed = match client.connector.dialed.lock() {
            Ok(dialed) => dialed.clone(),
            Err(_) => panic!("connector lock poisoned"),
        };
        assert_eq!(dialed, vec![("origin.test".to_owned(), 80)]);
    }
}

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sedori_types::{SedoriError, SedoriResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Unreserved characters per the SigV4 canonical encoding: `-_.~` stay raw,
/// everything else non-alphanumeric is percent-encoded.
const SIGV4_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// AWS Signature Version 4 signer for the `execute-api` service.
///
/// Signing is deterministic given a fixed signing instant; production callers
/// pass `Utc::now()`.
pub struct SigV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "execute-api".to_string(),
        }
    }

    /// Sign `request` in place, adding `host`, `x-amz-date`,
    /// `x-amz-content-sha256` and `Authorization` headers.
    pub fn sign(&self, request: &mut reqwest::Request, signing_time: DateTime<Utc>) -> SedoriResult<()> {
        let url = request.url().clone();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SedoriError::SpApi(format!(
                    "cannot sign URL without host: {url}"
                )))
            }
        };

        let payload_hash = hex::encode(Sha256::digest(
            request
                .body()
                .and_then(|body| body.as_bytes())
                .unwrap_or_default(),
        ));

        let amz_date = signing_time.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = signing_time.format("%Y%m%d").to_string();

        let method = request.method().as_str().to_string();
        let headers = request.headers_mut();
        headers.insert(
            "host",
            host.parse()
                .map_err(|_| SedoriError::SpApi(format!("invalid host header: {host}")))?,
        );
        headers.insert(
            "x-amz-date",
            amz_date
                .parse()
                .expect("amz-date is always a valid header value"),
        );
        headers.insert(
            "x-amz-content-sha256",
            payload_hash
                .parse()
                .expect("hex digest is always a valid header value"),
        );

        // Canonical headers: lowercase names, trimmed values with inner
        // whitespace collapsed, sorted by name.
        let mut canonical: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers.iter() {
            let name = name.as_str().to_ascii_lowercase();
            if name == "authorization" {
                continue;
            }
            let value = value
                .to_str()
                .map_err(|_| SedoriError::SpApi(format!("non-ASCII value for header {name}")))?;
            canonical
                .entry(name)
                .or_default()
                .push(collapse_whitespace(value));
        }

        let signed_headers = canonical.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = canonical
            .iter()
            .map(|(name, values)| format!("{name}:{}\n", values.join(",")))
            .collect();

        let canonical_query = canonical_query_string(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));

        let path = if url.path().is_empty() { "/" } else { url.path() };
        let canonical_request = format!(
            "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!(
            "{date_stamp}/{}/{}/aws4_request",
            self.region, self.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date_stamp),
            string_to_sign.as_bytes(),
        ));

        let authorization = format!(
            "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );
        request.headers_mut().insert(
            "authorization",
            authorization
                .parse()
                .map_err(|_| SedoriError::SpApi("invalid authorization header".to_string()))?,
        );

        Ok(())
    }

    /// HMAC key chain: `AWS4+secret -> date -> region -> service -> aws4_request`.
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let key = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let key = hmac_sha256(&key, self.region.as_bytes());
        let key = hmac_sha256(&key, self.service.as_bytes());
        hmac_sha256(&key, b"aws4_request")
    }
}

/// Build the canonical query string: pairs sorted by key then value, each
/// component percent-encoded with the SigV4 unreserved set. Repeated keys stay
/// as repeated pairs.
pub fn canonical_query_string(pairs: impl Iterator<Item = (String, String)>) -> String {
    let mut pairs: Vec<(String, String)> = pairs.collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, SIGV4_ENCODE),
                utf8_percent_encode(value, SIGV4_ENCODE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// SHA-256 of the empty string; the content hash every signed GET carries.
    const EMPTY_BODY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn signer() -> SigV4Signer {
        SigV4Signer::new(
            "AKIAEXAMPLE".to_string(),
            "SECRETKEYEXAMPLE".to_string(),
            "us-west-2".to_string(),
        )
    }

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
    }

    fn build_request() -> reqwest::Request {
        reqwest::Client::new()
            .get("https://sellingpartnerapi-fe.amazon.com/products/pricing/v0/competitivePrice")
            .query(&[("MarketplaceId", "A1VC38T7YXB528"), ("Asins", "B000123")])
            .header("x-amz-access-token", "token")
            .build()
            .unwrap()
    }

    #[test]
    fn signing_adds_required_headers() {
        let mut request = build_request();
        signer().sign(&mut request, fixed_instant()).unwrap();

        let headers = request.headers();
        assert_eq!(
            headers.get("host").unwrap(),
            "sellingpartnerapi-fe.amazon.com"
        );
        assert_eq!(headers.get("x-amz-date").unwrap(), "20240301T123045Z");
        assert_eq!(
            headers.get("x-amz-content-sha256").unwrap(),
            EMPTY_BODY_SHA256
        );

        let authorization = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/20240301/us-west-2/execute-api/aws4_request, SignedHeaders="
        ));
        assert!(authorization.contains("host;x-amz-access-token;x-amz-content-sha256;x-amz-date"));
        assert!(authorization.contains(", Signature="));
    }

    #[test]
    fn signing_is_deterministic_for_fixed_instant() {
        let mut first = build_request();
        let mut second = build_request();
        signer().sign(&mut first, fixed_instant()).unwrap();
        signer().sign(&mut second, fixed_instant()).unwrap();

        assert_eq!(
            first.headers().get("authorization"),
            second.headers().get("authorization")
        );
    }

    #[test]
    fn different_body_changes_the_signature() {
        let client = reqwest::Client::new();
        let mut first = client
            .post("https://sellingpartnerapi-fe.amazon.com/products/fees/v0/listings/fees")
            .body(r#"{"a":1}"#)
            .build()
            .unwrap();
        let mut second = client
            .post("https://sellingpartnerapi-fe.amazon.com/products/fees/v0/listings/fees")
            .body(r#"{"a":2}"#)
            .build()
            .unwrap();

        let signer = signer();
        signer.sign(&mut first, fixed_instant()).unwrap();
        signer.sign(&mut second, fixed_instant()).unwrap();

        assert_ne!(
            first.headers().get("authorization"),
            second.headers().get("authorization")
        );
        assert_ne!(
            first.headers().get("x-amz-content-sha256").unwrap(),
            EMPTY_BODY_SHA256
        );
    }

    #[test]
    fn canonical_query_sorts_and_percent_encodes() {
        let pairs = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "value with spaces".to_string()),
            ("a".to_string(), "another/value".to_string()),
        ];
        let canonical = canonical_query_string(pairs.into_iter());
        assert_eq!(
            canonical,
            "a=another%2Fvalue&a=value%20with%20spaces&b=2"
        );
    }

    #[test]
    fn canonical_query_keeps_unreserved_characters() {
        let canonical =
            canonical_query_string(vec![("key".to_string(), "a-b_c.d~e".to_string())].into_iter());
        assert_eq!(canonical, "key=a-b_c.d~e");
    }

    #[test]
    fn header_values_are_whitespace_collapsed() {
        assert_eq!(collapse_whitespace("  a   b  c "), "a b c");
    }
}

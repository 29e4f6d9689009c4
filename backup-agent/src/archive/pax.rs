//! PAX extended header records (`"<len> <key>=<value>\n"`) for the global
//! set header. Per-file records go through `tar::Builder::append_pax_extensions`.

/// Encode key/value pairs as PAX records.
pub fn encode_records<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut out = Vec::new();
    for (key, value) in records {
        encode_record(&mut out, key, value);
    }
    out
}

fn encode_record(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    // The length prefix counts itself, so it may need one more digit.
    let body = key.len() + value.len() + 3;
    let mut len = body + digits(body);
    if digits(len) > digits(body) {
        len = body + digits(len);
    }

    out.extend_from_slice(len.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
}

fn digits(mut n: usize) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

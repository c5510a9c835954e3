use smol_str::SmolStr;

/// An error which can be returned when splitting a `host:port` address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitHostPortError {
  /// Returned if the provided str is missing port.
  #[error("address {0}: missing port in address")]
  MissingPort(SmolStr),
  /// Returned if the host part contains a colon outside of brackets.
  #[error("address {0}: too many colons in address")]
  TooManyColons(SmolStr),
  /// Returned if an opening bracket is never closed.
  #[error("address {0}: missing ']' in address")]
  MissingBracket(SmolStr),
  /// Returned if a bracket shows up where it does not belong.
  #[error("address {0}: unexpected '{1}' in address")]
  UnexpectedBracket(SmolStr, char),
}

/// Splits `host:port`, `[host]:port` or `[ipv6]:port` into host and port.
///
/// The port is not validated, an IPv6 host must be enclosed in brackets.
///
/// e.g. valid address format:
/// 1. `www.example.com:8080`
/// 2. `[::1]:8080`
/// 3. `127.0.0.1:8080`
pub fn split_host_port(addr: &str) -> Result<(&str, &str), SplitHostPortError> {
  let Some(colon) = addr.rfind(':') else {
    return Err(SplitHostPortError::MissingPort(addr.into()));
  };

  // `open` and `close` mark where stray brackets start to be illegal.
  let (host, open, close) = if addr.starts_with('[') {
    let Some(end) = addr.find(']') else {
      return Err(SplitHostPortError::MissingBracket(addr.into()));
    };

    if end + 1 == addr.len() {
      return Err(SplitHostPortError::MissingPort(addr.into()));
    }
    if end + 1 != colon {
      return Err(if addr.as_bytes()[end + 1] == b':' {
        SplitHostPortError::TooManyColons(addr.into())
      } else {
        SplitHostPortError::MissingPort(addr.into())
      });
    }

    (&addr[1..end], 1, end + 1)
  } else {
    let host = &addr[..colon];
    if host.contains(':') {
      return Err(SplitHostPortError::TooManyColons(addr.into()));
    }
    (host, 0, 0)
  };

  if addr[open..].contains('[') {
    return Err(SplitHostPortError::UnexpectedBracket(addr.into(), '['));
  }
  if addr[close..].contains(']') {
    return Err(SplitHostPortError::UnexpectedBracket(addr.into(), ']'));
  }

  Ok((host, &addr[colon + 1..]))
}

/// Joins host and port, wrapping the host in brackets when it contains a colon.
pub fn join_host_port(host: &str, port: &str) -> String {
  if host.contains(':') {
    format!("[{host}]:{port}")
  } else {
    format!("{host}:{port}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_split_host_port() {
    let cases = [
      ("www.example.com:8080", ("www.example.com", "8080")),
      ("127.0.0.1:443", ("127.0.0.1", "443")),
      ("[::1]:80", ("::1", "80")),
      ("[2001:db8::1]:8443", ("2001:db8::1", "8443")),
      ("[host]:http", ("host", "http")),
      (":80", ("", "80")),
      ("host:", ("host", "")),
    ];

    for (addr, expected) in cases {
      assert_eq!(split_host_port(addr).unwrap(), expected, "{addr}");
    }
  }

  #[test]
  fn test_split_host_port_errors() {
    use SplitHostPortError::*;

    let cases = [
      ("example.com", MissingPort("example.com".into())),
      ("::1", TooManyColons("::1".into())),
      ("2001:db8::1:80", TooManyColons("2001:db8::1:80".into())),
      ("[::1]", MissingPort("[::1]".into())),
      ("[::1]80", MissingPort("[::1]80".into())),
      ("[::1]:80:90", TooManyColons("[::1]:80:90".into())),
      ("[::1:80", MissingBracket("[::1:80".into())),
      ("[a[b]:80", UnexpectedBracket("[a[b]:80".into(), '[')),
      ("host]:80", UnexpectedBracket("host]:80".into(), ']')),
      ("host:80]", UnexpectedBracket("host:80]".into(), ']')),
    ];

    for (addr, expected) in cases {
      assert_eq!(split_host_port(addr).unwrap_err(), expected, "{addr}");
    }
  }

  #[test]
  fn test_join_host_port() {
    assert_eq!(join_host_port("example.com", "80"), "example.com:80");
    assert_eq!(join_host_port("::1", "80"), "[::1]:80");
    let joined = join_host_port("2001:db8::1", "443");
    assert_eq!(split_host_port(&joined).unwrap(), ("2001:db8::1", "443"));
  }
}

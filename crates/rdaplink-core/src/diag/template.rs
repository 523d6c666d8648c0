//! `@X` key expansion for the drive's HTML shortcut file

use core::fmt;

use heapless::String;

/// Contents of `MBED.HTM`; `@R` becomes the board's web page
pub const MBED_HTM_TEMPLATE: &str = "<!doctype html>\r\n\
<!-- mbed Platform Website and Authentication Shortcut -->\r\n\
<html>\r\n\
<head>\r\n\
<meta charset=\"utf-8\">\r\n\
<title>mbed Website Shortcut</title>\r\n\
</head>\r\n\
<body>\r\n\
<script>\r\n\
window.location.replace(\"@R\");\r\n\
</script>\r\n\
</body>\r\n\
</html>\r\n";

/// Identity strings substituted into generated files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeInfo<'a> {
    /// `@M`
    pub mac: &'a str,
    /// `@U`
    pub unique_id: &'a str,
    /// `@B`
    pub board_id: &'a str,
    /// `@H`
    pub host_id: &'a str,
    /// `@T`
    pub target_id: &'a str,
    /// `@D`
    pub hdk_id: &'a str,
    /// `@V`
    pub version: &'a str,
    /// `@R`
    pub url: &'a str,
}

impl<'a> ProbeInfo<'a> {
    fn lookup(&self, key: Option<char>) -> &'a str {
        match key.map(|c| c.to_ascii_uppercase()) {
            Some('M') => self.mac,
            Some('U') => self.unique_id,
            Some('B') => self.board_id,
            Some('H') => self.host_id,
            Some('T') => self.target_id,
            Some('D') => self.hdk_id,
            Some('V') => self.version,
            Some('R') => self.url,
            _ => "ERROR",
        }
    }
}

/// The expanded text did not fit the output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expanded template exceeds buffer")
    }
}

/// Replace every `@X` key in `template` with the matching identity string
///
/// Keys are case-insensitive. An unknown key, or a `@` at the very end,
/// expands to `ERROR`. Substituted text is not scanned again.
pub fn expand<const N: usize>(
    template: &str,
    info: &ProbeInfo<'_>,
) -> core::result::Result<String<N>, Overflow> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]).map_err(|_| Overflow)?;
        let mut key = rest[at + 1..].chars();
        let name = key.next();
        out.push_str(info.lookup(name)).map_err(|_| Overflow)?;
        rest = key.as_str();
    }
    out.push_str(rest).map_err(|_| Overflow)?;
    Ok(out)
}

use crate::error::{Result, VfsError};
use crate::path::{HostType, PathType, SchemeType, Span, VfsPath};

const MAX_ACCESSION_LEN: usize = 20;

/// One state per shape the input can still take. The `NamePathOrScheme`
/// family runs before a scheme colon is seen; the `Rel` family mirrors it
/// after the colon, where `?` and `#` terminate instead of a scheme colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    AccPrefixAlphaNamePathOrScheme,
    AccAlphaNamePath,
    AccDigitNamePathOrScheme,
    AccDigitNamePath,
    AccExtNamePathOrScheme,
    AccExtNamePath,
    AccSuffixNamePath,
    AccDotNamePathOrScheme,
    AccDotNamePath,
    AccUnderNamePath,
    NamePathOrScheme,
    AccOidRelOrSlash,
    AccPrefixAlphaRel,
    AccAlphaRel,
    AccDigitRel,
    AccExtRel,
    AccSuffixRel,
    OidRel,
    AccDotRel,
    AccUnderRel,
    Slash,
    AuthHostSpec,
    AuthHostNamePort,
    HostSpec,
    HostNamePort,
    Ipv4Port,
    Ipv4Dot,
    Ipv6Port,
    Ipv6Colon,
    PortSpecOrFullPath,
    PortSpec,
    PortName,
    PortNum,
    NamePath,
    UncOrMalformedPosixPath,
    FullOrUncPath,
    RelPath,
    FullPath,
    UncPath,
    ParamName,
    ParamValue,
    Fragment,
}

#[derive(Debug, Clone, Copy, Default)]
struct AccCounts {
    prefix: u32,
    alpha: u32,
    digit: u32,
    ext: u32,
    suffix: u32,
}

fn unexpected(ch: char, at: usize) -> VfsError {
    VfsError::UnexpectedChar { ch, at }
}

fn capture_scheme(p: &mut VfsPath, start: usize, end: usize) {
    p.scheme = Span::new(start, end);
    p.from_uri = true;
    let scheme = &p.text[start..end];
    p.scheme_type = if scheme.eq_ignore_ascii_case("file") {
        SchemeType::File
    } else if scheme.eq_ignore_ascii_case("http") {
        SchemeType::Http
    } else if scheme.eq_ignore_ascii_case("https") {
        SchemeType::Https
    } else if scheme.eq_ignore_ascii_case("ftp") {
        SchemeType::Ftp
    } else if scheme.eq_ignore_ascii_case("fasp") {
        SchemeType::Fasp
    } else if scheme.eq_ignore_ascii_case("ncbi-acc") {
        SchemeType::NcbiAcc
    } else if scheme.eq_ignore_ascii_case("ncbi-obj") {
        SchemeType::NcbiObj
    } else if scheme.eq_ignore_ascii_case("ncbi-file") {
        SchemeType::NcbiFile
    } else if scheme.eq_ignore_ascii_case("ncbi-vfs") {
        SchemeType::NcbiVfs
    } else if scheme.eq_ignore_ascii_case("x-ncbi-legrefseq") {
        SchemeType::NcbiLegrefseq
    } else {
        SchemeType::NotSupported
    };
}

fn capture_accession(p: &mut VfsPath, start: usize, end: usize) {
    p.path = Span::new(start, end);
    p.path_type = match p.scheme_type {
        SchemeType::None => PathType::NameOrAccession,
        SchemeType::NcbiAcc if end - start < MAX_ACCESSION_LEN => PathType::Accession,
        _ => PathType::Name,
    };
}

fn capture_acc_code(p: &mut VfsPath, acc: AccCounts) {
    p.acc_code = (acc.prefix << 16) | (acc.alpha << 12) | (acc.digit << 8) | (acc.ext << 4) | acc.suffix;

    if p.path_type == PathType::NameOrAccession {
        match p.acc_code >> 8 {
            // refseq
            0x015 | 0x026 | 0x106 | 0x126 => p.path_type = PathType::Accession,
            // refseq or named annotation
            0x109 => p.path_type = PathType::Accession,
            // sra
            0x036..=0x039 => p.path_type = PathType::Accession,
            // wgs
            0x042 | 0x048 | 0x049 | 0x142 | 0x148 | 0x149 => p.path_type = PathType::Accession,
            0x029 => {
                if p.acc_code == 0x02910 && p.text[p.path.start..].starts_with("NA") {
                    p.path_type = PathType::Accession;
                }
            }
            _ => {}
        }
    }
}

fn capture_oid(p: &mut VfsPath, oid: u64, start: usize, oid_start: usize, end: usize) {
    let oid_size = end - oid_start;
    if oid == 0 || oid_size > 10 || oid > u64::from(u32::MAX) {
        p.path_type = PathType::Name;
    } else {
        p.obj_id = oid as u32;
        if p.scheme_type == SchemeType::NcbiObj {
            p.path = Span::new(oid_start, end);
            p.path_type = PathType::Oid;
            return;
        }
        p.path_type = PathType::NameOrOid;
    }
    p.path = Span::new(start, end);
}

fn capture_auth(p: &mut VfsPath, start: usize, end: usize) {
    p.auth = Span::new(start, end);
    p.path_type = PathType::Auth;
}

fn capture_host_name(p: &mut VfsPath, start: usize, end: usize) {
    p.host = Span::new(start, end);
    p.host_type = HostType::Dns;
    p.path_type = PathType::HostName;
}

fn capture_ipv4(p: &mut VfsPath, ipv4: &[u32; 4]) -> Result<()> {
    for octet in ipv4 {
        if *octet >= 256 {
            return Err(VfsError::ExcessiveData(format!("IPv4 octet {octet}")));
        }
    }
    p.ipv4 = (ipv4[0] << 24) | (ipv4[1] << 16) | (ipv4[2] << 8) | ipv4[3];
    p.host_type = HostType::Ipv4;
    p.path_type = PathType::Endpoint;
    Ok(())
}

fn capture_ipv6(p: &mut VfsPath, groups: &[u32; 8], last: usize, gap: Option<usize>) -> Result<()> {
    for group in groups {
        if *group >= 0x10000 {
            return Err(VfsError::ExcessiveData(format!("IPv6 group {group:x}")));
        }
    }
    let mut out = [0u16; 8];
    match gap {
        None => {
            for (i, group) in groups.iter().enumerate() {
                out[i] = *group as u16;
            }
        }
        Some(gap) => {
            // groups before the `::` stay left-aligned, groups after it are
            // right-aligned, zeros fill the gap
            for i in 0..gap {
                out[i] = groups[i] as u16;
            }
            let tail = last + 1 - gap;
            for k in 0..tail {
                out[8 - tail + k] = groups[gap + k] as u16;
            }
        }
    }
    p.ipv6 = out;
    p.host_type = HostType::Ipv6;
    p.path_type = PathType::Endpoint;
    Ok(())
}

fn capture_port_name(p: &mut VfsPath, start: usize, end: usize) {
    p.port_name = Span::new(start, end);
    p.path_type = PathType::Endpoint;
}

fn capture_port_num(p: &mut VfsPath, port: u32) -> Result<()> {
    if port >= 0x10000 {
        return Err(VfsError::ExcessiveData(format!("port {port}")));
    }
    p.port_num = port as u16;
    p.path_type = PathType::Endpoint;
    Ok(())
}

fn capture_path(p: &mut VfsPath, start: usize, end: usize, var: PathType) {
    p.path = Span::new(start, end);
    p.path_type = var;
}

fn capture_query(p: &mut VfsPath, start: usize, end: usize) {
    p.query = Span::new(start, end);
}

fn capture_fragment(p: &mut VfsPath, start: usize, end: usize) {
    p.fragment = Span::new(start, end);
}

/// Single pass, no backtracking. Every capture borrows a byte range of the
/// one owned backing buffer; nothing else is allocated while parsing.
pub(crate) fn parse(text: &str) -> Result<VfsPath> {
    let mut p = VfsPath::empty(text.to_string());
    let mut state = State::Start;
    let mut anchor = 0usize;

    let mut acc = AccCounts::default();

    let mut ip = 0usize;
    let mut ipv4 = [0u32; 4];
    let mut ipv6 = [0u32; 8];
    let mut ipv6_gap: Option<usize> = None;
    let mut port: u32 = 0;

    let mut oid: u64 = 0;
    let mut oid_anchor = 0usize;

    for (i, ch) in text.char_indices() {
        let ascii = ch.is_ascii();
        match state {
            State::Start => {
                if !ascii {
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha = 1;
                    state = State::AccPrefixAlphaNamePathOrScheme;
                } else if ch.is_ascii_digit() {
                    state = State::NamePath;
                } else {
                    match ch {
                        '/' => state = State::FullOrUncPath,
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => state = State::NamePath,
                    }
                }
            }

            State::AccPrefixAlphaNamePathOrScheme => {
                if !ascii {
                    acc.alpha = 0;
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha += 1;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                    state = State::AccDigitNamePathOrScheme;
                } else {
                    match ch {
                        '/' => {
                            acc.alpha = 0;
                            state = State::RelPath;
                        }
                        '_' => {
                            acc.prefix = 1;
                            acc.alpha = 0;
                            state = State::AccAlphaNamePath;
                        }
                        '.' | '+' | '-' => {
                            acc.alpha = 0;
                            state = State::NamePathOrScheme;
                        }
                        ':' => {
                            acc.alpha = 0;
                            capture_scheme(&mut p, anchor, i);
                            state = State::AccOidRelOrSlash;
                        }
                        '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc.alpha = 0;
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccAlphaNamePath => {
                if !ascii {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha += 1;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                    state = State::AccDigitNamePath;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDigitNamePathOrScheme => {
                if !ascii {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePathOrScheme;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '.' => state = State::AccDotNamePathOrScheme,
                        '+' | '-' => {
                            acc = AccCounts::default();
                            state = State::NamePathOrScheme;
                        }
                        ':' => {
                            acc = AccCounts::default();
                            capture_scheme(&mut p, anchor, i);
                            state = State::AccOidRelOrSlash;
                        }
                        '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDigitNamePath => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '.' => state = State::AccDotNamePath,
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccExtNamePathOrScheme => {
                if !ascii {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePathOrScheme;
                } else if ch.is_ascii_digit() {
                    // extension digits extend the current extension
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '.' => state = State::AccDotNamePathOrScheme,
                        '+' | '-' => {
                            acc = AccCounts::default();
                            state = State::NamePathOrScheme;
                        }
                        ':' => {
                            acc = AccCounts::default();
                            capture_scheme(&mut p, anchor, i);
                            state = State::AccOidRelOrSlash;
                        }
                        '?' | '#' => return Err(unexpected(ch, i)),
                        '_' if acc.prefix != 0 && acc.alpha == 0 && acc.digit == 9 => {
                            state = State::AccUnderNamePath;
                        }
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccExtNamePath => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    // extension digits extend the current extension
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '.' => state = State::AccDotNamePath,
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        '_' if acc.prefix != 0
                            && acc.alpha == 0
                            && acc.digit == 9
                            && acc.ext == 1 =>
                        {
                            state = State::AccUnderNamePath;
                        }
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccSuffixNamePath => {
                if !ascii || ch.is_ascii_digit() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    // a single trailing suffix letter run
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDotNamePathOrScheme => {
                if !ascii {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePathOrScheme;
                } else if ch.is_ascii_digit() {
                    acc.ext += 1;
                    state = State::AccExtNamePathOrScheme;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '.' | '+' | '-' => {
                            acc = AccCounts::default();
                            state = State::NamePathOrScheme;
                        }
                        ':' => {
                            acc = AccCounts::default();
                            capture_scheme(&mut p, anchor, i);
                            state = State::AccOidRelOrSlash;
                        }
                        '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDotNamePath => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    acc.ext += 1;
                    state = State::AccExtNamePath;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccUnderNamePath => {
                if !ascii || ch.is_ascii_digit() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.suffix += 1;
                    state = State::AccSuffixNamePath;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' | '?' | '#' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::NamePathOrScheme => {
                if !ascii {
                    state = State::NamePath;
                } else if ch.is_ascii_alphanumeric() {
                    // still a scheme candidate
                } else {
                    match ch {
                        '/' => state = State::RelPath,
                        '.' | '+' | '-' => {}
                        ':' => {
                            capture_scheme(&mut p, anchor, i);
                            state = State::AccOidRelOrSlash;
                        }
                        '?' | '#' => return Err(unexpected(ch, i)),
                        _ => state = State::NamePath,
                    }
                }
            }

            State::AccOidRelOrSlash => {
                anchor = i;
                acc.prefix = 0;
                acc.digit = 0;
                acc.ext = 0;

                if !ascii {
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha = 1;
                    state = State::AccPrefixAlphaRel;
                } else if ch.is_ascii_digit() {
                    oid = u64::from(ch as u8 - b'0');
                    oid_anchor = i;
                    state = State::OidRel;
                } else if ch != '/' {
                    state = State::NamePath;
                } else {
                    state = State::Slash;
                }
            }

            State::AccPrefixAlphaRel => {
                if !ascii {
                    acc.alpha = 0;
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha += 1;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                    state = State::AccDigitRel;
                } else {
                    match ch {
                        '_' => {
                            acc.prefix = 1;
                            acc.alpha = 0;
                            state = State::AccAlphaRel;
                        }
                        '/' => {
                            acc.alpha = 0;
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc.alpha = 0;
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccAlphaRel => {
                if !ascii {
                    acc.prefix = 0;
                    acc.alpha = 0;
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.alpha += 1;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                    state = State::AccDigitRel;
                } else {
                    match ch {
                        '/' => {
                            acc.prefix = 0;
                            acc.alpha = 0;
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc.prefix = 0;
                            acc.alpha = 0;
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDigitRel => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    acc.digit += 1;
                } else {
                    match ch {
                        '.' => state = State::AccDotRel,
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccExtRel => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    // extension digits extend the current extension
                } else {
                    match ch {
                        '.' => state = State::AccDotRel,
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        '_' if acc.prefix != 0
                            && acc.alpha == 0
                            && acc.digit == 9
                            && acc.ext == 1 =>
                        {
                            state = State::AccUnderRel;
                        }
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccSuffixRel => {
                if !ascii || ch.is_ascii_digit() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    // a single trailing suffix letter run
                } else {
                    match ch {
                        '.' => state = State::AccDotRel,
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_accession(&mut p, anchor, i);
                            capture_acc_code(&mut p, acc);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::OidRel => {
                if !ascii {
                    oid = 0;
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    if oid == 0 {
                        oid_anchor = i;
                    }
                    oid = oid
                        .saturating_mul(10)
                        .saturating_add(u64::from(ch as u8 - b'0'));
                } else {
                    match ch {
                        '/' => {
                            oid = 0;
                            state = State::RelPath;
                        }
                        '?' => {
                            capture_oid(&mut p, oid, anchor, oid_anchor, i);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_oid(&mut p, oid, anchor, oid_anchor, i);
                            state = State::Fragment;
                            anchor = i;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            oid = 0;
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccDotRel => {
                if !ascii || ch.is_ascii_alphabetic() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_digit() {
                    acc.ext += 1;
                    state = State::AccExtRel;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::AccUnderRel => {
                if !ascii || ch.is_ascii_digit() {
                    acc = AccCounts::default();
                    state = State::NamePath;
                } else if ch.is_ascii_alphabetic() {
                    acc.suffix += 1;
                    state = State::AccSuffixRel;
                } else {
                    match ch {
                        '/' => {
                            acc = AccCounts::default();
                            state = State::RelPath;
                        }
                        ':' => return Err(unexpected(ch, i)),
                        _ => {
                            acc = AccCounts::default();
                            state = State::NamePath;
                        }
                    }
                }
            }

            State::Slash => match ch {
                '/' => {
                    if p.scheme_type == SchemeType::NcbiFile {
                        state = State::UncOrMalformedPosixPath;
                    } else {
                        state = State::AuthHostSpec;
                    }
                }
                ':' => return Err(unexpected(ch, i)),
                '?' => {
                    capture_path(&mut p, anchor, i, PathType::FullPath);
                    state = State::ParamName;
                    anchor = i;
                }
                '#' => {
                    capture_path(&mut p, anchor, i, PathType::FullPath);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => state = State::FullPath,
            },

            State::AuthHostSpec | State::HostSpec => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                let with_auth = state == State::AuthHostSpec;
                anchor = i;
                if ch.is_ascii_alphabetic() {
                    state = if with_auth {
                        State::AuthHostNamePort
                    } else {
                        State::HostNamePort
                    };
                } else if ch.is_ascii_digit() {
                    ip = 0;
                    ipv4 = [0; 4];
                    ipv4[0] = u32::from(ch as u8 - b'0');
                    state = State::Ipv4Port;
                } else {
                    match ch {
                        '/' => state = State::FullPath,
                        '[' => {
                            ip = 0;
                            ipv6 = [0; 8];
                            ipv6_gap = None;
                            state = State::Ipv6Colon;
                        }
                        _ => return Err(unexpected(ch, i)),
                    }
                }
            }

            State::AuthHostNamePort => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if ch.is_ascii_alphanumeric() {
                    // host continues
                } else {
                    match ch {
                        '@' => {
                            capture_auth(&mut p, anchor, i);
                            state = State::HostSpec;
                        }
                        '.' | '+' | '-' | '_' => {}
                        ':' => {
                            capture_host_name(&mut p, anchor, i);
                            state = State::PortSpec;
                        }
                        '/' => {
                            capture_host_name(&mut p, anchor, i);
                            state = State::FullPath;
                            anchor = i;
                        }
                        _ => return Err(unexpected(ch, i)),
                    }
                }
            }

            State::HostNamePort => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if ch.is_ascii_alphanumeric() {
                    // host continues
                } else {
                    match ch {
                        '.' | '+' | '-' | '_' => {}
                        ':' => {
                            capture_host_name(&mut p, anchor, i);
                            state = State::PortSpec;
                        }
                        '/' => {
                            capture_host_name(&mut p, anchor, i);
                            state = State::FullPath;
                            anchor = i;
                        }
                        _ => return Err(unexpected(ch, i)),
                    }
                }
            }

            State::Ipv4Port => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if ipv4[ip] >= 256 {
                    return Err(VfsError::ExcessiveData(format!("IPv4 octet {}", ipv4[ip])));
                }
                if ch.is_ascii_digit() {
                    ipv4[ip] = ipv4[ip] * 10 + u32::from(ch as u8 - b'0');
                } else {
                    ip += 1;
                    if ip == 4 {
                        match ch {
                            ':' => {
                                capture_ipv4(&mut p, &ipv4)?;
                                state = State::PortSpec;
                            }
                            '/' => {
                                capture_ipv4(&mut p, &ipv4)?;
                                state = State::FullPath;
                                anchor = i;
                            }
                            _ => return Err(unexpected(ch, i)),
                        }
                    } else if ch == '.' {
                        state = State::Ipv4Dot;
                    } else {
                        return Err(unexpected(ch, i));
                    }
                }
            }

            State::Ipv4Dot => {
                if !ch.is_ascii_digit() {
                    return Err(unexpected(ch, i));
                }
                ipv4[ip] = u32::from(ch as u8 - b'0');
                state = State::Ipv4Port;
            }

            State::Ipv6Port => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if ipv6[ip] >= 0x10000 {
                    return Err(VfsError::ExcessiveData(format!("IPv6 group {:x}", ipv6[ip])));
                }
                if let Some(digit) = ch.to_digit(16) {
                    ipv6[ip] = (ipv6[ip] << 4) + digit;
                } else {
                    match ch {
                        ']' => {
                            capture_ipv6(&mut p, &ipv6, ip, ipv6_gap)?;
                            state = State::PortSpecOrFullPath;
                        }
                        ':' => {
                            ip += 1;
                            if ip == 8 {
                                return Err(unexpected(ch, i));
                            }
                            state = State::Ipv6Colon;
                        }
                        _ => return Err(unexpected(ch, i)),
                    }
                }
            }

            State::Ipv6Colon => {
                if ch == ':' {
                    ipv6_gap = Some(ip);
                } else {
                    match ch.to_digit(16) {
                        Some(digit) if ascii => ipv6[ip] = digit,
                        _ => return Err(unexpected(ch, i)),
                    }
                }
                state = State::Ipv6Port;
            }

            State::PortSpecOrFullPath => match ch {
                ':' => state = State::PortSpec,
                '/' => {
                    state = State::FullPath;
                    anchor = i;
                }
                _ => return Err(unexpected(ch, i)),
            },

            State::PortSpec => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                anchor = i;
                if ch.is_ascii_alphabetic() {
                    state = State::PortName;
                } else if ch.is_ascii_digit() {
                    port = u32::from(ch as u8 - b'0');
                    state = State::PortNum;
                } else if ch == '/' {
                    p.missing_port = true;
                    state = State::FullPath;
                } else {
                    return Err(unexpected(ch, i));
                }
            }

            State::PortName => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if ch.is_ascii_alphanumeric() {
                    // port name continues
                } else if ch == '/' {
                    capture_port_name(&mut p, anchor, i);
                    state = State::FullPath;
                    anchor = i;
                } else {
                    return Err(unexpected(ch, i));
                }
            }

            State::PortNum => {
                if !ascii {
                    return Err(unexpected(ch, i));
                }
                if port >= 0x10000 {
                    return Err(VfsError::ExcessiveData(format!("port {port}")));
                }
                if ch.is_ascii_digit() {
                    port = port * 10 + u32::from(ch as u8 - b'0');
                } else if ch == '/' {
                    capture_port_num(&mut p, port)?;
                    state = State::FullPath;
                    anchor = i;
                } else {
                    return Err(unexpected(ch, i));
                }
            }

            State::NamePath => match ch {
                '/' => state = State::RelPath,
                ':' => return Err(unexpected(ch, i)),
                '?' => {
                    capture_path(&mut p, anchor, i, PathType::Name);
                    state = State::ParamName;
                    anchor = i;
                }
                '#' => {
                    capture_path(&mut p, anchor, i, PathType::Name);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => {}
            },

            State::UncOrMalformedPosixPath => match ch {
                '/' => {
                    state = State::FullPath;
                    anchor = i;
                }
                ':' => return Err(unexpected(ch, i)),
                '?' => {
                    capture_path(&mut p, anchor, i, PathType::FullPath);
                    state = State::ParamName;
                    anchor = i;
                }
                '#' => {
                    capture_path(&mut p, anchor, i, PathType::FullPath);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => state = State::UncPath,
            },

            State::FullOrUncPath => {
                if ch == '/' {
                    state = State::UncOrMalformedPosixPath;
                } else {
                    state = State::FullPath;
                    match ch {
                        ':' => return Err(unexpected(ch, i)),
                        '?' => {
                            capture_path(&mut p, anchor, i, PathType::FullPath);
                            state = State::ParamName;
                            anchor = i;
                        }
                        '#' => {
                            capture_path(&mut p, anchor, i, PathType::FullPath);
                            state = State::Fragment;
                            anchor = i;
                        }
                        _ => {}
                    }
                }
            }

            State::RelPath | State::FullPath => match ch {
                ':' => return Err(unexpected(ch, i)),
                '?' => {
                    let var = if state == State::RelPath {
                        PathType::RelPath
                    } else {
                        PathType::FullPath
                    };
                    capture_path(&mut p, anchor, i, var);
                    state = State::ParamName;
                    anchor = i;
                }
                '#' => {
                    let var = if state == State::RelPath {
                        PathType::RelPath
                    } else {
                        PathType::FullPath
                    };
                    capture_path(&mut p, anchor, i, var);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => {}
            },

            State::UncPath => match ch {
                ':' => return Err(unexpected(ch, i)),
                '?' => {
                    capture_path(&mut p, anchor, i, PathType::UncPath);
                    state = State::ParamName;
                    anchor = i;
                }
                '#' => {
                    capture_path(&mut p, anchor, i, PathType::UncPath);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => {}
            },

            State::ParamName => match ch {
                ':' | '?' => return Err(unexpected(ch, i)),
                '=' => state = State::ParamValue,
                '#' => {
                    capture_query(&mut p, anchor, i);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => {}
            },

            State::ParamValue => match ch {
                ':' | '?' | '=' => return Err(unexpected(ch, i)),
                '&' => state = State::ParamName,
                '#' => {
                    capture_query(&mut p, anchor, i);
                    state = State::Fragment;
                    anchor = i;
                }
                _ => {}
            },

            State::Fragment => match ch {
                ':' | '?' | '#' => return Err(unexpected(ch, i)),
                _ => {}
            },
        }
    }

    let end = text.len();
    match state {
        State::Start => return Err(VfsError::EmptyString),

        State::AccPrefixAlphaNamePathOrScheme
        | State::AccAlphaNamePath
        | State::AccDigitNamePathOrScheme
        | State::AccDigitNamePath
        | State::AccExtNamePathOrScheme
        | State::AccExtNamePath
        | State::AccSuffixNamePath
        | State::AccPrefixAlphaRel
        | State::AccAlphaRel
        | State::AccDigitRel
        | State::AccExtRel
        | State::AccSuffixRel => {
            capture_accession(&mut p, anchor, end);
            capture_acc_code(&mut p, acc);
        }

        State::AccDotNamePathOrScheme
        | State::AccDotNamePath
        | State::AccUnderNamePath
        | State::NamePathOrScheme
        | State::NamePath => capture_path(&mut p, anchor, end, PathType::Name),

        State::AccOidRelOrSlash
        | State::AccDotRel
        | State::AccUnderRel
        | State::Slash
        | State::AuthHostSpec
        | State::HostSpec
        | State::Ipv4Dot
        | State::Ipv6Port
        | State::Ipv6Colon
        | State::PortSpecOrFullPath
        | State::PortSpec => return Err(VfsError::InsufficientData),

        State::OidRel => capture_oid(&mut p, oid, anchor, oid_anchor, end),

        State::AuthHostNamePort | State::HostNamePort => capture_host_name(&mut p, anchor, end),

        State::Ipv4Port => {
            ip += 1;
            if ip == 4 {
                capture_ipv4(&mut p, &ipv4)?;
            } else {
                return Err(VfsError::InsufficientData);
            }
        }

        State::PortName => capture_port_name(&mut p, anchor, end),
        State::PortNum => capture_port_num(&mut p, port)?,

        State::RelPath => capture_path(&mut p, anchor, end, PathType::RelPath),
        State::UncOrMalformedPosixPath | State::FullOrUncPath | State::FullPath => {
            capture_path(&mut p, anchor, end, PathType::FullPath)
        }
        State::UncPath => capture_path(&mut p, anchor, end, PathType::UncPath),

        State::ParamName | State::ParamValue => capture_query(&mut p, anchor, end),
        State::Fragment => capture_fragment(&mut p, anchor, end),
    }

    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(text: &str) -> VfsPath {
        parse(text).unwrap()
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse(""), Err(VfsError::EmptyString)));
    }

    #[test]
    fn scheme_only_is_insufficient() {
        assert!(matches!(parse("a:"), Err(VfsError::InsufficientData)));
        assert!(matches!(parse("http://"), Err(VfsError::InsufficientData)));
    }

    #[test]
    fn sra_accession_shape() {
        let p = ok("SRR001656");
        assert_eq!(p.uri_type(), SchemeType::None);
        assert_eq!(p.path_type(), PathType::Accession);
        assert_eq!(p.acc_code(), 0x03600);
        assert_eq!(p.acc_code() >> 8, 0x036);
    }

    #[test]
    fn refseq_accession_with_prefix_and_extension() {
        let p = ok("NC_000001.10");
        assert_eq!(p.path_type(), PathType::Accession);
        assert_eq!(p.acc_code(), 0x10610);
    }

    #[test]
    fn unrecognized_shape_stays_name_or_accession() {
        let p = ok("ABCDE12");
        assert_eq!(p.path_type(), PathType::NameOrAccession);
        assert_eq!(p.acc_code(), 0x5200);
    }

    #[test]
    fn ncbi_file_with_query() {
        let p = ok("ncbi-file:/data/x.sra?enc");
        assert_eq!(p.uri_type(), SchemeType::NcbiFile);
        assert_eq!(p.path_type(), PathType::FullPath);
        assert_eq!(p.path_str(), "/data/x.sra");
        assert_eq!(p.query(), "?enc");
        assert_eq!(p.param("enc").unwrap(), "");
    }

    #[test]
    fn full_url_with_port_query_fragment() {
        let p = ok("https://example.org:8080/a?x=1#frag");
        assert_eq!(p.uri_type(), SchemeType::Https);
        assert_eq!(p.host(), "example.org");
        assert_eq!(p.port_num(), 8080);
        assert_eq!(p.query(), "?x=1");
        assert_eq!(p.fragment(), "#frag");
        assert_eq!(p.path_str(), "/a");
    }

    #[test]
    fn oid_path() {
        let p = ok("ncbi-obj:42");
        assert_eq!(p.uri_type(), SchemeType::NcbiObj);
        assert_eq!(p.path_type(), PathType::Oid);
        assert_eq!(p.obj_id(), 42);
        assert_eq!(p.path_str(), "42");
    }

    #[test]
    fn oid_with_too_many_digits_is_a_name() {
        let p = ok("ncbi-obj:12345678901");
        assert_eq!(p.path_type(), PathType::Name);
        assert_eq!(p.obj_id(), 0);
    }

    #[test]
    fn oid_zero_is_a_name() {
        let p = ok("ncbi-obj:0");
        assert_eq!(p.path_type(), PathType::Name);
    }

    #[test]
    fn ipv6_loopback_right_aligns() {
        let p = ok("http://[::1]:80/x");
        assert_eq!(p.host_type(), HostType::Ipv6);
        assert_eq!(p.ipv6()[7], 1);
        assert_eq!(p.port_num(), 80);
    }

    #[test]
    fn ipv6_gap_in_the_middle() {
        let p = ok("http://[a::b]/");
        let groups = p.ipv6();
        assert_eq!(groups[0], 0xA);
        assert_eq!(groups[7], 0xB);
        assert!(groups[1..7].iter().all(|g| *g == 0));
    }

    #[test]
    fn ipv4_octet_out_of_range() {
        assert!(matches!(
            parse("http://256.1.1.1/x"),
            Err(VfsError::ExcessiveData(_))
        ));
    }

    #[test]
    fn ipv6_group_out_of_range() {
        assert!(matches!(
            parse("http://[FFFFF::1]/x"),
            Err(VfsError::ExcessiveData(_))
        ));
    }

    #[test]
    fn port_out_of_range() {
        assert!(matches!(
            parse("http://h:70000/x"),
            Err(VfsError::ExcessiveData(_))
        ));
    }

    #[test]
    fn unc_path_under_ncbi_file() {
        let p = ok("ncbi-file://host/share/file");
        assert_eq!(p.path_type(), PathType::UncPath);
        assert_eq!(p.path_str(), "//host/share/file");
    }

    #[test]
    fn triple_slash_is_a_posix_path() {
        let p = ok("ncbi-file:///data/x");
        assert_eq!(p.path_type(), PathType::FullPath);
        assert_eq!(p.path_str(), "/data/x");
    }

    #[test]
    fn colon_inside_a_name_is_rejected() {
        assert!(matches!(
            parse("/a/b:c"),
            Err(VfsError::UnexpectedChar { ch: ':', .. })
        ));
    }

    #[test]
    fn unknown_scheme_still_parses() {
        let p = ok("gopher://example.org/x");
        assert_eq!(p.uri_type(), SchemeType::NotSupported);
        assert_eq!(p.path_str(), "/x");
    }

    #[test]
    fn auth_before_host() {
        let p = ok("ftp://user@example.org/pub");
        assert_eq!(p.auth(), "user");
        assert_eq!(p.host(), "example.org");
        assert_eq!(p.path_str(), "/pub");
    }

    #[test]
    fn missing_port_is_flagged() {
        let p = ok("http://host:/x");
        assert!(p.missing_port());
        assert_eq!(p.port_num(), 0);
    }

    #[test]
    fn port_name_is_kept() {
        let p = ok("http://host:ftp/x");
        assert_eq!(p.port_name(), "ftp");
        assert_eq!(p.port_num(), 0);
    }

    #[test]
    fn host_only_url() {
        let p = ok("http://example.org");
        assert_eq!(p.path_type(), PathType::HostName);
        assert_eq!(p.host(), "example.org");
    }

    #[test]
    fn endpoint_url() {
        let p = ok("http://1.2.3.4");
        assert_eq!(p.path_type(), PathType::Endpoint);
        assert_eq!(p.host_type(), HostType::Ipv4);
        assert_eq!(p.ipv4(), 0x01020304);
    }

    #[test]
    fn na_annotation_code() {
        let p = ok("NA000008777.1");
        assert_eq!(p.acc_code(), 0x02910);
        assert_eq!(p.path_type(), PathType::Accession);
    }

    #[test]
    fn wgs_prefixed_shape() {
        let p = ok("X_ABCD12");
        assert_eq!(p.acc_code(), 0x14200);
        assert_eq!(p.path_type(), PathType::Accession);
    }

    #[test]
    fn non_ascii_demotes_to_name() {
        let p = ok("SRRé123");
        assert_eq!(p.path_type(), PathType::Name);
        assert_eq!(p.acc_code(), 0);
    }

    #[test]
    fn relative_path_with_accession_segment() {
        let p = ok("runs/SRR001656");
        assert_eq!(p.path_type(), PathType::RelPath);
        assert_eq!(p.path_str(), "runs/SRR001656");
    }
}

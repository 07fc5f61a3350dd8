use biodata_vfs::{HostType, PathOption, PathType, SchemeType, VfsError, VfsPath};

fn parse(text: &str) -> VfsPath {
    text.parse().unwrap()
}

fn assert_round_trip(text: &str) {
    let first = parse(text);
    let rendered = first.to_path_string().unwrap();
    let second: VfsPath = rendered.parse().unwrap();

    assert_eq!(second.path_type(), first.path_type(), "path_type for {text}");
    assert_eq!(second.acc_code(), first.acc_code(), "acc_code for {text}");
    assert_eq!(
        second.scheme().ok(),
        first.scheme().ok(),
        "effective scheme for {text}"
    );
    assert_eq!(
        second.to_path_string().unwrap(),
        rendered,
        "canonical rendering for {text}"
    );
}

#[test]
fn serialization_round_trips_semantically() {
    for text in [
        "SRR001656",
        "NC_000001.10",
        "NA000008777.1",
        "ABCDE12",
        "plain-name",
        "rel/path/file.txt",
        "/abs/path/file.sra",
        "file:/abs/path",
        "ncbi-file:/data/x.sra?enc",
        "ncbi-file://host/share/file",
        "ncbi-acc:SRR001656",
        "ncbi-obj:42",
        "http://example.org",
        "https://example.org:8080/a?x=1#frag",
        "ftp://user@example.org/pub/file.gz",
        "http://1.2.3.4:80/x",
        "http://[0:0:0:0:0:0:0:1]/x",
        "x-ncbi-legrefseq:/archive.sra#refseq",
        "gopher://example.org/unsupported",
        "fasp://host/data",
    ] {
        assert_round_trip(text);
    }
}

#[test]
fn params_survive_round_trip() {
    let text = "ncbi-file:/data/x.sra?enc&tic=TICKET&readgroup=rg1#frag";
    let first = parse(text);
    let second: VfsPath = first.to_path_string().unwrap().parse().unwrap();
    for key in ["enc", "tic", "readgroup"] {
        assert_eq!(first.param(key).unwrap(), second.param(key).unwrap());
    }
    assert!(matches!(
        second.param("absent"),
        Err(VfsError::ParamNotFound(_))
    ));
}

// boundary cases

#[test]
fn empty_input() {
    assert!(matches!(
        "".parse::<VfsPath>(),
        Err(VfsError::EmptyString)
    ));
}

#[test]
fn scheme_only() {
    assert!(matches!(
        "a:".parse::<VfsPath>(),
        Err(VfsError::InsufficientData)
    ));
}

#[test]
fn ipv4_octet_too_large() {
    assert!(matches!(
        "http://256.1.1.1/".parse::<VfsPath>(),
        Err(VfsError::ExcessiveData(_))
    ));
}

#[test]
fn ipv6_group_too_large() {
    assert!(matches!(
        "http://[FFFFF::1]/".parse::<VfsPath>(),
        Err(VfsError::ExcessiveData(_))
    ));
}

#[test]
fn port_too_large() {
    assert!(matches!(
        "http://example.org:65536/".parse::<VfsPath>(),
        Err(VfsError::ExcessiveData(_))
    ));
}

#[test]
fn oid_digit_overflow_is_a_name() {
    let path = parse("ncbi-obj:12345678901");
    assert_eq!(path.path_type(), PathType::Name);
}

// concrete scenarios

#[test]
fn scenario_sra_accession() {
    let path = parse("SRR001656");
    assert_eq!(path.uri_type(), SchemeType::None);
    assert_eq!(path.path_type(), PathType::Accession);
    assert_eq!(path.acc_code(), 0x03600);
    assert_eq!(path.acc_code() >> 8, 0x036);
}

#[test]
fn scenario_encrypted_ncbi_file() {
    let path = parse("ncbi-file:/data/x.sra?enc");
    assert_eq!(path.uri_type(), SchemeType::NcbiFile);
    assert_eq!(path.path_type(), PathType::FullPath);
    assert_eq!(path.param("enc").unwrap(), "");
    assert_eq!(path.option(PathOption::Encrypted).unwrap(), "");
}

#[test]
fn scenario_https_url_is_byte_identical() {
    let text = "https://example.org:8080/a?x=1#frag";
    let path = parse(text);
    assert_eq!(path.uri_type(), SchemeType::Https);
    assert_eq!(path.host(), "example.org");
    assert_eq!(path.port_num(), 8080);
    assert_eq!(path.query(), "?x=1");
    assert_eq!(path.fragment(), "#frag");
    assert_eq!(path.to_uri().unwrap(), text);
    assert_eq!(path.to_path_string().unwrap(), text);
}

#[test]
fn scenario_oid() {
    let path = parse("ncbi-obj:42");
    assert_eq!(path.uri_type(), SchemeType::NcbiObj);
    assert_eq!(path.path_type(), PathType::Oid);
    assert_eq!(path.obj_id(), 42);
}

#[test]
fn scenario_ipv6_authority() {
    let path = parse("http://[::1]:80/");
    assert_eq!(path.host_type(), HostType::Ipv6);
    assert_eq!(path.ipv6()[7], 1);
    assert!(path.ipv6()[..7].iter().all(|g| *g == 0));
    assert_eq!(path.port_num(), 80);
}

// assorted classification checks

#[test]
fn unc_requires_ncbi_file_scheme() {
    let unc = parse("ncbi-file://storage/vol0/run.sra");
    assert_eq!(unc.path_type(), PathType::UncPath);
    assert_eq!(unc.path_str(), "//storage/vol0/run.sra");

    let url = parse("http://storage/vol0/run.sra");
    assert_eq!(url.path_type(), PathType::FullPath);
    assert_eq!(url.host(), "storage");
    assert_eq!(url.path_str(), "/vol0/run.sra");
}

#[test]
fn query_and_fragment_keep_their_markers() {
    let path = parse("ncbi-acc:SRR001656?tic=abc#part");
    assert_eq!(path.path_type(), PathType::Accession);
    assert_eq!(path.query(), "?tic=abc");
    assert_eq!(path.fragment(), "#part");
    assert_eq!(path.fragment_value(), "part");
}

#[test]
fn accession_inside_url_path() {
    let path = parse("ncbi-acc:NC_000001.10?vdb-ctx=refseq");
    assert_eq!(path.path_type(), PathType::Accession);
    assert_eq!(path.acc_code(), 0x10610);
    assert_eq!(path.option(PathOption::VdbCtx).unwrap(), "refseq");
}

#[test]
fn read_copies_honour_buffer_limits() {
    let path = parse("https://example.org:8080/a?x=1#frag");
    let mut buf = [0u8; 128];

    let n = path.read_host(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"example.org");

    let n = path.read_query(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"x=1");

    let n = path.read_fragment(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"frag");

    let mut tiny = [0u8; 2];
    assert!(matches!(
        path.read_host(&mut tiny),
        Err(VfsError::BufferInsufficient { .. })
    ));
}

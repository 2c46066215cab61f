use std::process::Command;

fn scratch(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("http-upload-cli-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let cfg = dir.join("config.json");
    std::fs::write(
        &cfg,
        format!(r#"{{"log_file":"{}"}}"#, dir.join("cli.log").display()),
    )
    .unwrap();
    cfg
}

#[test]
fn decode_prints_slot() {
    let dir = scratch("decode");
    let reply = dir.join("reply.xml");
    std::fs::write(
        &reply,
        r#"<slot xmlns="urn:xmpp:http:upload:0">
             <put url="https://upload.montague.lit/4a771ac1/tr%C3%A8s%20cool.jpg">
               <header name="Authorization">Basic Base64String==</header>
               <header name="Cookie">foo=bar; user=romeo</header>
             </put>
             <get url="https://download.montague.lit/4a771ac1/tr%C3%A8s%20cool.jpg"/>
           </slot>"#,
    )
    .unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_http-upload"))
        .arg("-c")
        .arg(write_config(&dir))
        .arg("decode")
        .arg(&reply)
        .output()
        .expect("run http-upload");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert_eq!(
        stdout.lines().collect::<Vec<_>>(),
        vec![
            "put https://upload.montague.lit/4a771ac1/tr%C3%A8s%20cool.jpg",
            "header Authorization: Basic Base64String==",
            "header Cookie: foo=bar; user=romeo",
            "get https://download.montague.lit/4a771ac1/tr%C3%A8s%20cool.jpg",
        ]
    );
    assert!(dir.join("cli.log").exists());
}

#[test]
fn decode_reports_size_limit() {
    let dir = scratch("too-large");
    let reply = dir.join("error.xml");
    std::fs::write(
        &reply,
        r#"<error type="modify">
             <not-acceptable xmlns="urn:ietf:params:xml:ns:xmpp-stanzas"/>
             <text xmlns="urn:ietf:params:xml:ns:xmpp-stanzas">File too large</text>
             <file-too-large xmlns="urn:xmpp:http:upload:0">
               <max-file-size>20000</max-file-size>
             </file-too-large>
           </error>"#,
    )
    .unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_http-upload"))
        .arg("-c")
        .arg(write_config(&dir))
        .arg("decode")
        .arg(&reply)
        .output()
        .expect("run http-upload");
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout).unwrap().trim(),
        "file too large: max 20000 bytes"
    );
}

#[test]
fn malformed_header_argument_is_rejected() {
    let out = Command::new(env!("CARGO_BIN_EXE_http-upload"))
        .args([
            "put",
            "missing.bin",
            "--put-url",
            "http://127.0.0.1:1/up",
            "--get-url",
            "http://127.0.0.1:1/down",
            "-H",
            "no-equals-sign",
        ])
        .output()
        .expect("run http-upload");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("name=value"));
}

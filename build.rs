use std::{env, fs, io::Write, path::PathBuf};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let certs_dir = PathBuf::from("certs");
    let key_path = certs_dir.join("dev_key.pem");
    let cert_path = certs_dir.join("dev_cert.pem");
    println!("cargo:rerun-if-changed={}", key_path.display());
    println!("cargo:rerun-if-changed={}", cert_path.display());

    let key = fs::read_to_string(&key_path)
        .unwrap_or_else(|e| panic!("missing {}: {}", key_path.display(), e));
    let cert = fs::read_to_string(&cert_path)
        .unwrap_or_else(|e| panic!("missing {}: {}", cert_path.display(), e));

    let mut out_file = fs::File::create(out_dir.join("dev_identity.rs")).unwrap();
    write!(
        out_file,
        "pub const PRIVATE_KEY: &str = r#\"{}\"#;\npub const CERTIFICATE: &str = r#\"{}\"#;\n",
        key.trim_end(),
        cert.trim_end()
    )
    .unwrap();
}

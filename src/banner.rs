// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    let banner = r#"
                                                          _
__  ____ _ _   _  ___ _   _  ___    __ _ _ __ __ _  __| | ___ _ __
\ \/ / _` | | | |/ _ \ | | |/ _ \  / _` | '__/ _` |/ _` |/ _ \ '__|
 >  < (_| | |_| |  __/ |_| |  __/ | (_| | | | (_| | (_| |  __/ |
/_/\_\__, |\__,_|\___|\__,_|\___|  \__, |_|  \__,_|\__,_|\___|_|
        |_|                        |___/

    Sandboxed Code Grading Service
"#;
    // stdout belongs to worker replies, so the banner goes to stderr
    eprintln!("{}", banner);
}

pub mod ip_allowlist;

/// OpenSSL configuration defining the CA defaults and every extension
/// section the default fixtures reference.
pub const BUNDLED_OPENSSL_CONFIG: &str = include_str!("../assets/openssl.cnf");

/// Where the bundled configuration lands inside the working directory.
pub const OPENSSL_CONFIG_NAME: &str = "openssl.cnf";

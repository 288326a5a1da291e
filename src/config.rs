use clap::Parser;

use crate::broker::BrokerConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "cmb-local", about = "Local CNS (SNS) and CQS (SQS) broker")]
pub struct Args {
    #[arg(long, env = "CMB_CNS_PORT", default_value = "6061")]
    pub cns_port: u16,
    #[arg(long, env = "CMB_CQS_PORT", default_value = "6059")]
    pub cqs_port: u16,
    /// Address both services bind to.
    #[arg(long, env = "CMB_HOST", default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, env = "CMB_REGION", default_value = "csv")]
    pub region: String,
    #[arg(long, env = "CMB_ACCOUNT_ID", default_value = "000000000000")]
    pub account_id: String,
    /// Access key that owns the default account. Signatures are never
    /// verified, so there is no secret key.
    #[arg(long, env = "CMB_ACCESS_KEY", default_value = "test")]
    pub access_key: String,
}

impl Args {
    pub fn cns_bind(&self) -> String {
        format!("{}:{}", self.host, self.cns_port)
    }

    pub fn cqs_bind(&self) -> String {
        format!("{}:{}", self.host, self.cqs_port)
    }

    /// Host name placed in queue urls. Wildcard bind addresses are not
    /// reachable, so they advertise `localhost`.
    fn public_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "localhost",
            host => host,
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            access_key: self.access_key.clone(),
            cns_base_url: format!("http://{}:{}", self.public_host(), self.cns_port),
            cqs_base_url: format!("http://{}:{}", self.public_host(), self.cqs_port),
        }
    }
}

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Classifier repository on Hugging Face Hub
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Local path to the classifier directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Classifier revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Run on CPU even when an accelerator is available
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Labels mapping in format "0=Benign,1=Malignant"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_ref().map(|labels| {
            labels
                .split(',')
                .filter_map(|pair| {
                    let mut parts = pair.split('=');
                    let id = parts.next()?.trim().parse().ok()?;
                    let label = parts.next()?.trim().to_string();
                    Some((id, label))
                })
                .collect()
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_address_joins_host_and_port() {
        let config = Config::try_parse_from([
            "breast-cancer-api",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--model-path",
            "/models/bc",
        ])
        .unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.model_path, Some(PathBuf::from("/models/bc")));
    }

    #[test]
    fn id2label_skips_malformed_pairs() {
        let config = Config::try_parse_from([
            "breast-cancer-api",
            "--id2label",
            "0=Benign, 1=Malignant,oops,x=Nope",
        ])
        .unwrap();
        let labels = config.parse_id2label().unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&0], "Benign");
        assert_eq!(labels[&1], "Malignant");
    }

    #[test]
    fn id2label_absent_when_not_given() {
        let config = Config::try_parse_from(["breast-cancer-api"]).unwrap();
        assert!(config.parse_id2label().is_none());
    }
}

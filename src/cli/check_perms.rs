use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::source::{DriveSource, FileAccess};

/// 列出 Drive 目录中文件的所有者和共享权限，用于排查服务账号无法访问的问题
#[derive(Parser, Debug, Clone)]
pub struct CheckPermsCommand {
    /// Google Drive 目录 ID
    #[arg(long, env = "DRIVE_FOLDER_ID", value_name = "ID")]
    pub folder_id: String,
    /// 服务账号 JSON 文件
    #[arg(long, env = "SERVICE_ACCOUNT_FILE", default_value = "serviceAcc.json")]
    pub service_account_file: PathBuf,
}

/// 单个文件的权限报告
pub fn format_access(file: &FileAccess) -> String {
    let owners = file
        .owners
        .iter()
        .map(|o| o.email_address.as_deref().unwrap_or("-"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines = vec![
        "----".to_owned(),
        format!("id: {}", file.id),
        format!("name: {}", file.name),
        format!("owners: [{}]", owners),
        format!("shared: {}", file.shared),
    ];
    if file.permissions.is_empty() {
        lines.push(" perm: <none listed>".to_owned());
    }
    for p in &file.permissions {
        lines.push(format!(" perm: {} {} {}", p.role, p.kind, p.grantee()));
    }
    lines.join("\n")
}

impl SubCommandExtend for CheckPermsCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let source =
            DriveSource::from_service_account_file(&self.service_account_file, self.folder_id.clone())?;
        let files = source.list_access().await?;
        info!("目录 {} 中共有 {} 个文件", source.folder_id(), files.len());
        println!("Found {} files in folder {}", files.len(), source.folder_id());
        for file in &files {
            println!("{}", format_access(file));
        }
        Ok(())
    }
}

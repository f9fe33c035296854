use anyhow::{Context, Result, bail};
use uuid::Uuid;

use qrstudio_core::codes::{self, CodeRepository};
use qrstudio_core::session::UserAccount;
use qrstudio_db::models::SavedQrCode;

use crate::CodesCommands;

pub async fn run_codes_command(
    command: CodesCommands,
    repo: &dyn CodeRepository,
    account: &UserAccount,
) -> Result<()> {
    if account.is_guest() {
        bail!("sign in to manage saved codes (`qrstudio signin --email <EMAIL>`)");
    }

    match command {
        CodesCommands::List => {
            let list = codes::list_codes(repo, account).await?;
            print!("{}", format_codes(&list));
        }
        CodesCommands::Delete { id } => {
            let id = parse_id(&id)?;
            if codes::delete_code(repo, account, id).await? {
                println!("Deleted code {id}.");
            } else {
                bail!("no saved code {id}");
            }
        }
        CodesCommands::Retarget { id, url } => {
            let id = parse_id(&id)?;
            match codes::update_destination(repo, account, id, &url).await? {
                Some(code) => println!("Code {id} now points to {}.", code.destination_url),
                None => bail!("no dynamic code {id}"),
            }
        }
        CodesCommands::Scan { short_code } => {
            match codes::record_scan(repo, account.id, &short_code).await? {
                Some(redirect) => {
                    println!("-> {}", redirect.destination_url);
                    match redirect.scan_count {
                        Some(n) => println!("   scans: {n}"),
                        None => println!("   scans are not tracked on this plan"),
                    }
                }
                None => bail!("no dynamic code with short code {short_code:?}"),
            }
        }
    }
    Ok(())
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid code ID: {id}"))
}

pub fn format_codes(list: &[SavedQrCode]) -> String {
    if list.is_empty() {
        return String::from("No saved codes.\n");
    }
    let mut out = format!(
        "{:<36}  {:<8} {:>6}  {:<16} {}\n",
        "ID", "TYPE", "SCANS", "NAME", "DESTINATION"
    );
    for c in list {
        out.push_str(&format!(
            "{:<36}  {:<8} {:>6}  {:<16} {}\n",
            c.id.to_string(),
            c.qr_type.to_string(),
            c.scan_count,
            c.name.as_deref().unwrap_or("-"),
            c.destination_url,
        ));
        if let Some(url) = &c.short_url {
            out.push_str(&format!("{:<36}  {url}\n", ""));
        }
    }
    out
}

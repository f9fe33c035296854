//! `qrstudio generate`: run the generation workflow from the terminal.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Args;

use qrstudio_core::authz;
use qrstudio_core::codes::{self, CodeRepository, DynamicCodeSaver};
use qrstudio_core::history::{FileBackend, HistoryStore};
use qrstudio_core::render::{QrCodeRenderer, Surface};
use qrstudio_core::request::{Appearance, HexColor, QrCodeRequest};
use qrstudio_core::session::Session;
use qrstudio_core::workflow::{CommitHook, GenerationOutcome, GenerationWorkflow, WorkflowConfig};
use qrstudio_core::{ContentCategory, EcLevel};

const BAR_WIDTH: usize = 20;

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// URL or text to encode
    pub content: String,
    /// Create a dynamic code whose destination can change later
    #[arg(long)]
    pub dynamic: bool,
    /// Content category: url, document, social_media, menu, app_store
    #[arg(long, default_value = "url")]
    pub category: ContentCategory,
    /// Foreground color (#rrggbb)
    #[arg(long)]
    pub fg: Option<HexColor>,
    /// Background color (#rrggbb)
    #[arg(long)]
    pub bg: Option<HexColor>,
    /// Error correction level: L, M, Q, H
    #[arg(long)]
    pub ec: Option<EcLevel>,
    /// Image size in pixels: 128, 256, 512 or 1024
    #[arg(long)]
    pub size: Option<u32>,
    /// Name shown in the saved codes list (dynamic codes only)
    #[arg(long)]
    pub name: Option<String>,
    /// Write the image to FILE.png or FILE.svg
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

/// Output format picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Svg,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => Ok(Self::Png),
            Some("svg") => Ok(Self::Svg),
            _ => bail!(
                "unsupported output file {}; use a .png or .svg extension",
                path.display()
            ),
        }
    }
}

impl GenerateArgs {
    pub fn appearance(&self) -> Appearance {
        let defaults = Appearance::default();
        Appearance {
            foreground: self.fg.unwrap_or(defaults.foreground),
            background: self.bg.unwrap_or(defaults.background),
            error_correction: self.ec.unwrap_or(defaults.error_correction),
            size_px: self.size.unwrap_or(defaults.size_px),
        }
    }

    pub fn request(&self) -> QrCodeRequest {
        let request = QrCodeRequest::new(self.content.clone())
            .with_category(self.category)
            .with_appearance(self.appearance());
        if self.dynamic { request.dynamic() } else { request }
    }
}

pub struct GenerateContext {
    pub session: Session,
    pub history_dir: PathBuf,
    pub workflow: WorkflowConfig,
    pub repo: Option<Arc<dyn CodeRepository>>,
}

pub async fn run_generate(ctx: GenerateContext, args: &GenerateArgs) -> Result<()> {
    // Check the file name before spending a run on it.
    let format = args.out.as_deref().map(ExportFormat::from_path).transpose()?;

    let mut session = ctx.session;
    let mut saver = None;
    if args.dynamic {
        // Plan denials come before the database requirement.
        authz::require_dynamic(session.account(), session.limits())?;
        let Some(repo) = ctx.repo else {
            bail!("dynamic codes are saved to the database; configure one with `qrstudio init --db-url <URL>`");
        };
        let account = codes::account_with_usage(repo.as_ref(), session.account()).await?;
        session = session.with_dynamic_code_count(account.dynamic_code_count);
        saver = Some(Arc::new(DynamicCodeSaver::new(repo, &session, args.name.clone())));
    }

    let backend = FileBackend::new(&ctx.history_dir, &session.account().storage_key());
    let history = Arc::new(Mutex::new(HistoryStore::open(Box::new(backend))));
    let mut workflow =
        GenerationWorkflow::new(history, Arc::new(QrCodeRenderer::new()), ctx.workflow);
    if let Some(saver) = &saver {
        workflow = workflow.with_commit_hook(Arc::clone(saver) as Arc<dyn CommitHook>);
    }
    if !workflow.can_generate() {
        bail!("rendering is not available");
    }

    let handle = workflow.start(&session, args.request(), draw_progress)?;
    let outcome = tokio::select! {
        result = handle.outcome() => result?,
        _ = tokio::signal::ctrl_c() => {
            workflow.cancel();
            eprintln!();
            bail!("generation cancelled");
        }
    };
    eprintln!();

    report(&outcome);

    if let Some(saved) = saver.as_ref().and_then(|s| s.saved()) {
        println!("Saved dynamic code {} ({})", saved.id, saved.short_url.unwrap_or_default());
    }

    if let (Some(path), Some(format)) = (args.out.as_deref(), format) {
        export(&outcome.surface, path, format)?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

fn draw_progress(percent: u8) {
    let filled = usize::from(percent) * BAR_WIDTH / 100;
    let mut err = std::io::stderr().lock();
    let _ = write!(
        err,
        "\rGenerating [{}{}] {percent:>3}%",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled)
    );
    let _ = err.flush();
}

fn report(outcome: &GenerationOutcome) {
    let entry = &outcome.entry;
    println!("Generated {} QR code for {}", entry.qr_type, entry.content);
    if let Some(link) = &outcome.short_link {
        println!("  short link: {}", link.url);
    }
    println!("  history id: {}", entry.id);
    if let Some(warning) = &outcome.persistence_warning {
        eprintln!("warning: history not saved: {warning}");
    }
}

pub fn export(surface: &Surface, path: &Path, format: ExportFormat) -> Result<()> {
    let bytes = match format {
        ExportFormat::Png => surface.to_png().context("failed to encode PNG")?,
        ExportFormat::Svg => surface.to_svg().into_bytes(),
    };
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use qrstudio_core::PlanTier;
    use qrstudio_core::codes::MemoryCodeRepository;
    use qrstudio_core::session::UserAccount;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: GenerateArgs,
    }

    fn parse(argv: &[&str]) -> GenerateArgs {
        TestCli::try_parse_from(std::iter::once("generate").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn defaults_build_a_static_default_request() {
        let args = parse(&["https://example.com"]);
        let request = args.request();
        assert_eq!(request.qr_type, qrstudio_core::QrType::Static);
        assert_eq!(request.content_category, ContentCategory::Url);
        assert!(request.appearance.is_default());
    }

    #[test]
    fn flags_override_appearance() {
        let args = parse(&[
            "menu",
            "--dynamic",
            "--category",
            "menu",
            "--fg",
            "#112233",
            "--ec",
            "h",
            "--size",
            "512",
        ]);
        let request = args.request();
        assert_eq!(request.qr_type, qrstudio_core::QrType::Dynamic);
        assert_eq!(request.content_category, ContentCategory::Menu);
        assert_eq!(request.appearance.foreground, HexColor([0x11, 0x22, 0x33]));
        assert_eq!(request.appearance.background, HexColor::WHITE);
        assert_eq!(request.appearance.error_correction, EcLevel::H);
        assert_eq!(request.appearance.size_px, 512);
    }

    #[test]
    fn bad_color_is_a_parse_error() {
        let result = TestCli::try_parse_from(["generate", "x", "--fg", "red"]);
        assert!(result.is_err());
    }

    #[test]
    fn export_format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.png")).unwrap(), ExportFormat::Png);
        assert_eq!(ExportFormat::from_path(Path::new("b.SVG")).unwrap(), ExportFormat::Svg);
        assert!(ExportFormat::from_path(Path::new("c.jpg")).is_err());
        assert!(ExportFormat::from_path(Path::new("noext")).is_err());
    }

    #[tokio::test]
    async fn generate_writes_history_and_svg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("code.svg");
        let args = parse(&["https://example.com", "--out", out.to_str().unwrap()]);
        let ctx = GenerateContext {
            session: Session::guest(),
            history_dir: tmp.path().join("history"),
            workflow: fast(),
            repo: None,
        };

        run_generate(ctx, &args).await.unwrap();

        let svg = std::fs::read_to_string(&out).unwrap();
        assert!(svg.contains("<svg"));
        let store = HistoryStore::open(Box::new(FileBackend::new(tmp.path().join("history"), "guest")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].content, "https://example.com");
    }

    fn fast() -> WorkflowConfig {
        WorkflowConfig {
            duration: std::time::Duration::from_millis(20),
            tick: std::time::Duration::from_millis(10),
            ..WorkflowConfig::default()
        }
    }

    #[tokio::test]
    async fn guest_dynamic_gets_the_plan_denial() {
        let tmp = tempfile::TempDir::new().unwrap();
        let args = parse(&["https://example.com", "--dynamic"]);
        let ctx = GenerateContext {
            session: Session::guest(),
            history_dir: tmp.path().to_path_buf(),
            workflow: WorkflowConfig::default(),
            repo: None,
        };
        let err = run_generate(ctx, &args).await.unwrap_err();
        assert!(err.to_string().contains("free plan or higher"), "{err}");
    }

    #[tokio::test]
    async fn free_dynamic_without_database_is_refused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let args = parse(&["https://example.com", "--dynamic"]);
        let account = UserAccount::new(uuid::Uuid::new_v4(), "f@example.com", PlanTier::Free);
        let ctx = GenerateContext {
            session: Session::new(account),
            history_dir: tmp.path().to_path_buf(),
            workflow: WorkflowConfig::default(),
            repo: None,
        };
        let err = run_generate(ctx, &args).await.unwrap_err();
        assert!(err.to_string().contains("database"), "{err}");
    }

    #[tokio::test]
    async fn dynamic_codes_stop_at_the_free_quota() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(MemoryCodeRepository::new());
        let account = repo.upsert_account("q@example.com", PlanTier::Free).await.unwrap();

        let mut results = Vec::new();
        for content in ["https://1.example", "https://2.example", "https://3.example"] {
            let ctx = GenerateContext {
                session: Session::new(account.clone()),
                history_dir: tmp.path().to_path_buf(),
                workflow: fast(),
                repo: Some(repo.clone()),
            };
            results.push(run_generate(ctx, &parse(&[content, "--dynamic"])).await);
        }

        assert!(results[0].is_ok() && results[1].is_ok());
        let err = results[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("limit of 2"), "{err}");
        assert_eq!(repo.count_dynamic(account.id).await.unwrap(), 2);

        let store = HistoryStore::open(Box::new(FileBackend::new(tmp.path(), &account.storage_key())));
        let contents: Vec<&str> = store.list().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["https://2.example", "https://1.example"]);
    }
}

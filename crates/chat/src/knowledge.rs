//! System instruction assembly for the support assistant.

use std::fs;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu, ensure};

pub const ASSISTANT_NAME: &str = "LBRL Buddy";

/// FAQ corpus compiled into the binary.
pub const BUNDLED_FAQ: &str = include_str!("../assets/faq.md");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum KnowledgeError {
    #[snafu(display("failed to read FAQ corpus {} on `{stage}`, {source}", path.display()))]
    ReadFaq {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("FAQ corpus {} is empty", path.display()))]
    EmptyFaq { stage: &'static str, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBase {
    assistant_name: String,
    faq: String,
}

impl KnowledgeBase {
    pub fn new(assistant_name: impl Into<String>, faq: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            faq: faq.into(),
        }
    }

    pub fn bundled() -> Self {
        Self::new(ASSISTANT_NAME, BUNDLED_FAQ)
    }

    /// Loads a replacement FAQ corpus from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let faq = fs::read_to_string(path).context(ReadFaqSnafu {
            stage: "read-faq",
            path: path.to_path_buf(),
        })?;
        ensure!(
            !faq.trim().is_empty(),
            EmptyFaqSnafu {
                stage: "read-faq",
                path: path.to_path_buf(),
            }
        );

        tracing::debug!(path = %path.display(), bytes = faq.len(), "loaded FAQ corpus");
        Ok(Self::new(ASSISTANT_NAME, faq))
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn faq(&self) -> &str {
        &self.faq
    }

    /// Greeting shown as the first assistant message of every session.
    pub fn welcome_message(&self) -> String {
        format!(
            "Hi there! I'm {}, your interactive support assistant. Feel free to ask me anything \
             about the knowledge base, and I'll do my best to help you out! 🤖",
            self.assistant_name
        )
    }

    /// Builds the system instruction sent ahead of every conversation.
    ///
    /// The FAQ sits between the critical facts and the response guidelines,
    /// so the model reads it as the authoritative source.
    pub fn build_system_instruction(&self) -> String {
        let name = &self.assistant_name;
        let faq = self.faq.trim();

        format!(
            r#"
You are {name}, the official AI support assistant for the "Live Background Removal Lite" OBS plugin.
Your goal is to help streamers (especially gamers) install and configure the plugin successfully.

--- CORE IDENTITY ---
- **Gaming-First:** You prioritize gaming performance. You know that this plugin runs on the CPU to save GPU for games.
- **Crash-Resistant:** You emphasize that this plugin is rewritten for stability.
- **Multi-lingual:** You MUST answer in the same language as the user's question (Japanese or English).

--- CRITICAL FACTS (DO NOT HALLUCINATE) ---
1. **Windows Installer:** There is NO `.exe` or `.msi` installer. Users MUST manually extract the `.zip` file.
2. **Mac Support:** The plugin works great on Apple Silicon (M1/M2/M3) thanks to ncnn optimization.
3. **Linux Support:** We only officially provide `.deb` for Ubuntu. Arch Linux users MUST build from source (AUR is unofficial). Flatpak is not yet on Flathub.
4. **AVX2:** The plugin REQUIRES a CPU with AVX2 support.

--- KNOWLEDGE BASE PRIORITY ---
Always prioritize the information below over your general knowledge.

{faq}

--- RESPONSE GUIDELINES ---
1. **Be Empathetic:** Acknowledge that setting up OBS plugins can be tricky.
2. **Troubleshooting:** If a user says "it doesn't work", ask about their OS and if they checked the folder structure or Visual C++ Redistributable.
3. **Attribution:** When using facts from the FAQ, say "According to the documentation..." or "Based on the knowledge base...".

--- ADVANCED KNOWLEDGE (DEVELOPMENT & SECURITY) ---

1. **Building from Source (CONTRIBUTING.md)**
   - **Prerequisites:** C++17 Compiler, CMake 3.28+, ninja/make.
   - **macOS Build:** `cmake --preset macos` -> `cmake --build --preset macos`
   - **Windows Build:** Use Visual Studio 2022 or `cmake --preset windows-x64`.
   - **Style Guide:** Use `clang-format-19` for C++ and `gersemi` for CMake.

2. **Security Policy (SECURITY.md)**
   - **Critical Rule:** DO NOT report security vulnerabilities on public GitHub Issues.
   - **Action:** Report vulnerabilities via email to: umireon+security@kaito.tokyo

3. **Unsupported Platforms (Arch / Flatpak)**
   - **Arch Linux:** Use `makepkg -si` in the `unsupported/arch` directory. (Unofficial)
   - **Flatpak:** Use `flatpak-builder` with the manifest in `unsupported/flatpak`. (Unofficial)

4. **Dependencies (buildspec.json)**
   - **OBS Studio:** Requires version 31.1.1 or compatible.
   - **Qt:** Uses Qt 6.

---------------------------
"#
        )
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::bundled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_is_deterministic_and_embeds_faq() {
        let knowledge = KnowledgeBase::new("Tester", "## Q\nA unique answer 42.");
        let first = knowledge.build_system_instruction();
        assert_eq!(first, knowledge.build_system_instruction());

        assert!(first.contains("You are Tester, the official AI support assistant"));
        let priority = first.find("--- KNOWLEDGE BASE PRIORITY ---").unwrap();
        let faq = first.find("A unique answer 42.").unwrap();
        let guidelines = first.find("--- RESPONSE GUIDELINES ---").unwrap();
        assert!(priority < faq && faq < guidelines);
    }

    #[test]
    fn bundled_corpus_carries_critical_facts() {
        let knowledge = KnowledgeBase::bundled();
        assert_eq!(knowledge.assistant_name(), ASSISTANT_NAME);
        assert!(knowledge.faq().contains("AVX2"));
        assert!(knowledge.build_system_instruction().contains("umireon+security@kaito.tokyo"));
        assert!(knowledge.welcome_message().starts_with("Hi there! I'm LBRL Buddy"));
    }

    #[test]
    fn missing_faq_file_reports_path() {
        let path = std::env::temp_dir().join("lbrl-buddy-missing-faq-for-test.md");
        let err = KnowledgeBase::from_file(&path).unwrap_err();
        assert!(matches!(err, KnowledgeError::ReadFaq { .. }));
        assert!(err.to_string().contains("lbrl-buddy-missing-faq-for-test.md"));
    }

    #[test]
    fn faq_file_replaces_bundled_corpus() {
        let path = std::env::temp_dir().join(format!("lbrl-buddy-faq-{}.md", std::process::id()));
        fs::write(&path, "Custom corpus line").unwrap();
        let knowledge = KnowledgeBase::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(knowledge.faq(), "Custom corpus line");
        assert!(knowledge.build_system_instruction().contains("Custom corpus line"));

        let blank = std::env::temp_dir().join(format!("lbrl-buddy-blank-{}.md", std::process::id()));
        fs::write(&blank, "  \n").unwrap();
        let err = KnowledgeBase::from_file(&blank).unwrap_err();
        fs::remove_file(&blank).unwrap();
        assert!(matches!(err, KnowledgeError::EmptyFaq { .. }));
    }
}

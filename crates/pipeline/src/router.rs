//! Classification of inbound messages into commands.

use {
    stickerbot_common::{Error, InboundMessage, Result},
    stickerbot_media::ConversionOverrides,
};

use crate::context::{Command, commands};

pub const HELP_TEXT: &str = "*Lista de Comandos*:
```
-`!imagem` → Envie uma imagem, GIF ou vídeo com esse comando na legenda para transformar em figurinha. Opções: `quality=1-100` `size=128-512`.

-`!gif` → Em grupos, responda a um GIF ou vídeo com esse comando para transformar em figurinha animada.

-`!texto <mensagem>` → Faz uma figurinha a partir do texto fornecido.

-`!ajuda` → Mostra esta lista.```
Em conversa privada, basta enviar a mídia.";

pub const GROUP_GREETING: &str =
    "Olá, fui adicionado! Digite !ajuda para ver os comandos disponíveis.";

/// Replies for commands that cannot be served.
pub mod rejections {
    pub const IMAGE_WITHOUT_MEDIA: &str =
        "Envie uma imagem ou vídeo com o comando `!imagem` para transformá-lo em figurinha.";
    pub const EMPTY_TEXT: &str = "Envie um texto válido após o comando.";
    pub const GIF_WITHOUT_QUOTED_MEDIA: &str =
        "Responda a um GIF com o comando `!gif` para transformá-lo em figurinha.";
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Help,
    /// Admit a conversion through the middleware chain.
    Convert(Command),
    /// Look up the quoted message first, then convert its media.
    Quoted { args: String },
    /// Explicit command that cannot be served; reply with the text.
    Reject(&'static str),
    Ignore,
}

/// Arguments after `command` when `body` starts with that command word.
fn command_args<'a>(body: &'a str, command: &str) -> Option<&'a str> {
    let rest = body.trim_start().strip_prefix(command)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

#[must_use]
pub fn classify(message: &InboundMessage) -> Route {
    let body = message.body.as_str();

    if command_args(body, commands::HELP).is_some() {
        return Route::Help;
    }

    if let Some(args) = command_args(body, commands::IMAGE) {
        if !message.has_media {
            return Route::Reject(rejections::IMAGE_WITHOUT_MEDIA);
        }
        return Route::Convert(Command::Image { args: args.into() });
    }

    if let Some(text) = command_args(body, commands::TEXT) {
        if text.is_empty() {
            return Route::Reject(rejections::EMPTY_TEXT);
        }
        return Route::Convert(Command::Text { text: text.into() });
    }

    if !message.is_group() && message.has_media {
        return Route::Convert(Command::Implicit);
    }

    if message.is_group()
        && let Some(args) = command_args(body, commands::QUOTED_GIF)
    {
        if !message.has_quoted_msg {
            return Route::Reject(rejections::GIF_WITHOUT_QUOTED_MEDIA);
        }
        return Route::Quoted { args: args.into() };
    }

    Route::Ignore
}

/// Parse `key=value` option tokens such as `quality=60 size=256`.
///
/// Only syntax is checked here; ranges are checked when the options are
/// resolved against the configured defaults.
pub fn parse_overrides(args: &str) -> Result<ConversionOverrides> {
    let mut overrides = ConversionOverrides::default();
    for token in args.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| Error::validation(format!("expected key=value, got {token:?}")))?;
        match key.to_ascii_lowercase().as_str() {
            "quality" | "qualidade" => {
                overrides.quality = Some(value.parse().map_err(|_| {
                    Error::invalid_field("quality", format!("invalid quality {value:?}"))
                })?);
            },
            "size" | "tamanho" => {
                overrides.size = Some(value.parse().map_err(|_| {
                    Error::invalid_field("size", format!("invalid size {value:?}"))
                })?);
            },
            other => return Err(Error::validation(format!("unknown option {other:?}"))),
        }
    }
    Ok(overrides)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn private(body: &str, has_media: bool) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            from: "5511999999999@c.us".into(),
            body: body.into(),
            message_type: if has_media { "image" } else { "chat" }.into(),
            has_media,
            ..Default::default()
        }
    }

    fn group(body: &str, has_quoted_msg: bool) -> InboundMessage {
        InboundMessage {
            from: "5511999999999-1600000000@g.us".into(),
            author: Some("5511888888888@c.us".into()),
            has_quoted_msg,
            ..private(body, false)
        }
    }

    #[test]
    fn image_command() {
        assert_eq!(
            classify(&private("!imagem", true)),
            Route::Convert(Command::Image {
                args: String::new()
            })
        );
        assert_eq!(
            classify(&private("!imagem quality=60", true)),
            Route::Convert(Command::Image {
                args: "quality=60".into()
            })
        );
        assert_eq!(
            classify(&private("!imagem", false)),
            Route::Reject(rejections::IMAGE_WITHOUT_MEDIA)
        );
    }

    #[test]
    fn text_command() {
        assert_eq!(
            classify(&private("!texto  bom dia ", false)),
            Route::Convert(Command::Text {
                text: "bom dia".into()
            })
        );
        assert_eq!(
            classify(&private("!texto    ", false)),
            Route::Reject(rejections::EMPTY_TEXT)
        );
        assert_eq!(
            classify(&private("!texto", false)),
            Route::Reject(rejections::EMPTY_TEXT)
        );
    }

    #[test]
    fn command_word_must_stand_alone() {
        assert_eq!(classify(&private("!textoabc", false)), Route::Ignore);
        assert_eq!(classify(&private("!imagens", false)), Route::Ignore);
    }

    #[test]
    fn implicit_conversion_only_in_private_chats() {
        assert_eq!(
            classify(&private("", true)),
            Route::Convert(Command::Implicit)
        );
        let mut in_group = group("", false);
        in_group.has_media = true;
        assert_eq!(classify(&in_group), Route::Ignore);
    }

    #[test]
    fn quoted_gif_in_groups() {
        assert_eq!(classify(&group("!gif", true)), Route::Quoted {
            args: String::new()
        });
        assert_eq!(
            classify(&group("!gif", false)),
            Route::Reject(rejections::GIF_WITHOUT_QUOTED_MEDIA)
        );
        assert_eq!(classify(&private("!gif", false)), Route::Ignore);
    }

    #[test]
    fn help_and_chatter() {
        assert_eq!(classify(&private("!ajuda", false)), Route::Help);
        assert_eq!(classify(&group("!ajuda", false)), Route::Help);
        assert_eq!(classify(&private("bom dia", false)), Route::Ignore);
    }

    #[test]
    fn overrides_parse() {
        let o = parse_overrides("quality=60 size=256").unwrap();
        assert_eq!((o.quality, o.size), (Some(60), Some(256)));
        let o = parse_overrides("  ").unwrap();
        assert!(o.is_empty());
        let o = parse_overrides("QUALIDADE=10").unwrap();
        assert_eq!(o.quality, Some(10));
    }

    #[test]
    fn bad_overrides_are_validation_errors() {
        for args in ["quality", "quality=abc", "quality=300", "depth=3"] {
            let err = parse_overrides(args).unwrap_err();
            assert_eq!(
                err.code(),
                stickerbot_common::ErrorCode::InvalidInput,
                "{args}"
            );
        }
    }
}

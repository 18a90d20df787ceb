//! Translation between X11 selection targets and mime types.

use x11rb::{
    errors::ReplyOrIdError,
    protocol::xproto::{Atom, AtomEnum, ConnectionExt as _},
    rust_connection::RustConnection,
};

use crate::xwayland::xwm::Atoms;

const UTF8_TEXT: &str = "text/plain;charset=utf-8";
const PLAIN_TEXT: &str = "text/plain";

/// Mime type announced for an X11 target atom.
///
/// Returns `None` for targets that do not look like mime types, e.g. `MULTIPLE` or `SAVE_TARGETS`.
pub fn mime_from_atom(atom: Atom, conn: &RustConnection, atoms: &Atoms) -> Result<Option<String>, ReplyOrIdError> {
    let mime = match atom {
        x if x == atoms.UTF8_STRING => UTF8_TEXT.to_owned(),
        x if x == atoms.TEXT => PLAIN_TEXT.to_owned(),
        x if x == atoms.TARGETS || x == atoms.TIMESTAMP => return Ok(None),
        x => return Ok(atom_name(x, conn)?.and_then(|name| offered_mime(&name))),
    };
    Ok(Some(mime))
}

/// Mime type an X11 client asks for when converting a selection to `atom`.
///
/// Unlike [`mime_from_atom`] this accepts the legacy text targets and any other atom name, leaving
/// it to [`negotiate`] to find the closest offer.
pub fn requested_mime_from_atom(
    atom: Atom,
    conn: &RustConnection,
    atoms: &Atoms,
) -> Result<Option<String>, ReplyOrIdError> {
    match atom {
        x if x == atoms.UTF8_STRING => Ok(Some(UTF8_TEXT.to_owned())),
        x if x == atoms.TEXT || x == u32::from(AtomEnum::STRING) => Ok(Some(PLAIN_TEXT.to_owned())),
        x if x == atoms.TARGETS || x == atoms.TIMESTAMP => Ok(None),
        x => Ok(atom_name(x, conn)?.and_then(|name| requested_mime(&name))),
    }
}

fn atom_name(atom: Atom, conn: &RustConnection) -> Result<Option<String>, ReplyOrIdError> {
    let reply = conn.get_atom_name(atom)?.reply()?;
    Ok(String::from_utf8(reply.name).ok())
}

fn offered_mime(name: &str) -> Option<String> {
    name.contains('/').then(|| name.to_owned())
}

/// Maps the name of a requested target atom to a mime type.
pub(crate) fn requested_mime(name: &str) -> Option<String> {
    match name {
        "UTF8_STRING" => Some(UTF8_TEXT.to_owned()),
        "TEXT" | "STRING" | "COMPOUND_TEXT" => Some(PLAIN_TEXT.to_owned()),
        "TARGETS" | "TIMESTAMP" | "MULTIPLE" | "SAVE_TARGETS" => None,
        name => Some(name.to_owned()),
    }
}

/// X11 target atom for a mime type, interning it if necessary
pub fn atom_from_mime(mime: &str, conn: &RustConnection, atoms: &Atoms) -> Result<Atom, ReplyOrIdError> {
    match mime {
        UTF8_TEXT => Ok(atoms.UTF8_STRING),
        PLAIN_TEXT => Ok(atoms.TEXT),
        mime => Ok(conn.intern_atom(false, mime.as_bytes())?.reply()?.atom),
    }
}

fn top_level_type(mime: &str) -> &str {
    mime.split_once('/').map(|(kind, _)| kind).unwrap_or(mime)
}

/// Pick the offered mime type best matching `requested`.
///
/// X11 clients tend to ask for overly specific types, so an exact match is followed by a match on
/// the top-level type, then by a substring match in either direction, and finally the first
/// offered type. Candidates are always tried in the order they were offered.
pub fn negotiate<'a>(requested: &str, available: &'a [String]) -> Option<&'a str> {
    let requested_type = top_level_type(requested);
    available
        .iter()
        .find(|mime| *mime == requested)
        .or_else(|| {
            available
                .iter()
                .find(|mime| mime.contains('/') && top_level_type(mime) == requested_type)
        })
        .or_else(|| {
            available
                .iter()
                .find(|mime| mime.contains(requested) || requested.contains(mime.as_str()))
        })
        .or_else(|| available.first())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::{negotiate, offered_mime, requested_mime};

    fn offered(mimes: &[&str]) -> Vec<String> {
        mimes.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn exact_match_wins() {
        let available = offered(&["text/html", "text/plain;charset=utf-8", "text/plain"]);
        assert_eq!(negotiate("text/plain", &available), Some("text/plain"));
    }

    #[test]
    fn top_level_type_is_preferred_over_substring() {
        let available = offered(&["image/png", "application/x-text", "text/html"]);
        assert_eq!(negotiate("text/plain;charset=utf-8", &available), Some("text/html"));
    }

    #[test]
    fn substring_match() {
        let available = offered(&["application/octet-stream", "x-special/gnome-copied-files"]);
        assert_eq!(
            negotiate("gnome-copied-files", &available),
            Some("x-special/gnome-copied-files")
        );
    }

    #[test]
    fn falls_back_to_first_offered() {
        let available = offered(&["image/png", "image/jpeg"]);
        assert_eq!(negotiate("text/uri-list", &available), Some("image/png"));
        assert_eq!(negotiate("text/uri-list", &[]), None);
    }

    #[test]
    fn order_is_stable() {
        let available = offered(&["text/html", "text/richtext", "text/plain"]);
        for _ in 0..10 {
            assert_eq!(negotiate("text/x-moz-url", &available), Some("text/html"));
        }
    }

    #[test]
    fn legacy_text_targets_are_requested_as_plain_text() {
        for name in ["STRING", "TEXT", "COMPOUND_TEXT"] {
            assert_eq!(requested_mime(name).as_deref(), Some("text/plain"));
        }
        assert_eq!(
            requested_mime("UTF8_STRING").as_deref(),
            Some("text/plain;charset=utf-8")
        );

        let available = offered(&["text/plain"]);
        let requested = requested_mime("STRING").unwrap();
        assert_eq!(negotiate(&requested, &available), Some("text/plain"));
    }

    #[test]
    fn meta_targets_are_not_requestable() {
        for name in ["TARGETS", "TIMESTAMP", "MULTIPLE", "SAVE_TARGETS"] {
            assert_eq!(requested_mime(name), None, "{name}");
        }
    }

    #[test]
    fn other_requested_names_pass_through() {
        assert_eq!(requested_mime("text/uri-list").as_deref(), Some("text/uri-list"));
        assert_eq!(requested_mime("PIXMAP").as_deref(), Some("PIXMAP"));
    }

    #[test]
    fn offers_need_a_mime_shape() {
        assert_eq!(offered_mime("image/png").as_deref(), Some("image/png"));
        assert_eq!(offered_mime("STRING"), None);
    }
}

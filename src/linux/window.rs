//! Top-level window enumeration using EWMH

use anyhow::{Context, Result};
use serde::Serialize;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, GetPropertyReply, Setup, Window};

use crate::capture::WindowId;

#[derive(Debug, Clone, Serialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub class: String,
    pub width: u32,
    pub height: u32,
}

fn get_atom(conn: &impl Connection, name: &str) -> Result<Atom> {
    let reply = conn
        .intern_atom(false, name.as_bytes())
        .context("Failed to intern atom")?
        .reply()
        .context("Failed to get atom reply")?;
    Ok(reply.atom)
}

fn get_property_value(
    conn: &impl Connection,
    window: Window,
    property: Atom,
    prop_type: Atom,
) -> Result<Option<GetPropertyReply>> {
    let reply = conn
        .get_property(false, window, property, prop_type, 0, u32::MAX)
        .context("Failed to get property")?
        .reply()
        .context("Failed to get property reply")?;

    if reply.value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(reply))
    }
}

/// `_NET_WM_NAME`, falling back to `WM_NAME`
fn get_window_title(conn: &impl Connection, window: Window) -> Result<String> {
    let net_wm_name = get_atom(conn, "_NET_WM_NAME")?;
    let utf8_string = get_atom(conn, "UTF8_STRING")?;

    if let Some(reply) = get_property_value(conn, window, net_wm_name, utf8_string)? {
        let title = String::from_utf8_lossy(&reply.value).into_owned();
        if !title.is_empty() {
            return Ok(title);
        }
    }

    let reply = get_property_value(conn, window, AtomEnum::WM_NAME.into(), AtomEnum::STRING.into())?;
    Ok(reply
        .map(|r| String::from_utf8_lossy(&r.value).into_owned())
        .unwrap_or_default())
}

/// Class part of `WM_CLASS`, or the instance part if the class is empty.
fn get_wm_class(conn: &impl Connection, window: Window) -> Result<String> {
    let Some(reply) =
        get_property_value(conn, window, AtomEnum::WM_CLASS.into(), AtomEnum::STRING.into())?
    else {
        return Ok(String::new());
    };
    Ok(parse_wm_class(&reply.value))
}

fn parse_wm_class(value: &[u8]) -> String {
    let mut parts = value.split(|&b| b == 0);
    let instance = parts.next().unwrap_or_default();
    let class = parts.next().unwrap_or_default();
    let chosen = if class.is_empty() { instance } else { class };
    String::from_utf8_lossy(chosen).into_owned()
}

fn root_window(setup: &Setup, screen_num: usize) -> Result<Window> {
    let screen = setup
        .roots
        .get(screen_num)
        .with_context(|| format!("Screen {screen_num} out of range"))?;
    Ok(screen.root)
}

/// Windows listed in the root's `_NET_CLIENT_LIST`.
pub fn list_windows(conn: &impl Connection, screen_num: usize) -> Result<Vec<WindowInfo>> {
    let root = root_window(conn.setup(), screen_num)?;
    let net_client_list = get_atom(conn, "_NET_CLIENT_LIST")?;

    let ids: Vec<Window> = get_property_value(conn, root, net_client_list, AtomEnum::WINDOW.into())?
        .and_then(|reply| reply.value32().map(|iter| iter.collect()))
        .unwrap_or_default();

    let mut result = Vec::new();
    for id in ids {
        // Windows can vanish between listing and querying
        let geom = match conn.get_geometry(id) {
            Ok(cookie) => cookie.reply(),
            Err(e) => Err(e.into()),
        };
        let Ok(geom) = geom else {
            continue;
        };

        result.push(WindowInfo {
            id,
            title: get_window_title(conn, id).unwrap_or_default(),
            class: get_wm_class(conn, id).unwrap_or_default(),
            width: geom.width as u32,
            height: geom.height as u32,
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::x11_utils::TryParse;

    /// Connection setup block with no vendor string, formats or screens.
    fn empty_setup() -> Setup {
        let mut bytes = vec![0u8; 40];
        bytes[0] = 1; // success
        Setup::try_parse(&bytes).unwrap().0
    }

    #[test]
    fn test_root_window_out_of_range() {
        let setup = empty_setup();
        assert!(setup.roots.is_empty());
        let err = root_window(&setup, 0).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_parse_wm_class_prefers_class() {
        assert_eq!(parse_wm_class(b"discord\0Discord\0"), "Discord");
    }

    #[test]
    fn test_parse_wm_class_falls_back_to_instance() {
        assert_eq!(parse_wm_class(b"xterm\0\0"), "xterm");
        assert_eq!(parse_wm_class(b"xterm"), "xterm");
        assert_eq!(parse_wm_class(b""), "");
    }
}

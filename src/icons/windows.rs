//! Icon extraction from executables via the Shell and GDI

use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows::core::PCWSTR;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, GetDC, ReleaseDC, SelectObject,
    BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBRUSH,
};
use windows::Win32::UI::Shell::ExtractIconExW;
use windows::Win32::UI::WindowsAndMessaging::{DestroyIcon, DrawIconEx, DI_NORMAL, HICON};

use super::{finish_bgra, IconSource, ICON_SIZE};

/// Draws the executable's first large icon into a 32x32 DIB
pub struct ShellIconSource;

impl IconSource for ShellIconSource {
    fn extract(&self, exe_path: &Path) -> Option<String> {
        let wide: Vec<u16> = exe_path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        unsafe {
            let mut icon = HICON::default();
            let count = ExtractIconExW(PCWSTR(wide.as_ptr()), 0, Some(&mut icon), None, 1);
            if count == 0 || icon.is_invalid() {
                return None;
            }

            let pixels = render(icon);
            let _ = DestroyIcon(icon);
            finish_bgra(pixels?, ICON_SIZE)
        }
    }
}

unsafe fn render(icon: HICON) -> Option<Vec<u8>> {
    let size = ICON_SIZE as i32;
    let screen = GetDC(Some(HWND::default()));
    let mem_dc = CreateCompatibleDC(Some(screen));

    let info = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: size,
            // Negative height: top-down rows
            biHeight: -size,
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    };

    let mut bits: *mut std::ffi::c_void = std::ptr::null_mut();
    let pixels = match CreateDIBSection(Some(mem_dc), &info, DIB_RGB_COLORS, &mut bits, None, 0) {
        Ok(dib) => {
            let copied = if bits.is_null() {
                None
            } else {
                let previous = SelectObject(mem_dc, dib.into());
                let drawn = DrawIconEx(
                    mem_dc,
                    0,
                    0,
                    icon,
                    size,
                    size,
                    0,
                    Some(HBRUSH::default()),
                    DI_NORMAL,
                );
                let len = (ICON_SIZE * ICON_SIZE * 4) as usize;
                let copied = drawn
                    .ok()
                    .map(|_| std::slice::from_raw_parts(bits as *const u8, len).to_vec());
                SelectObject(mem_dc, previous);
                copied
            };
            // The bitmap is released on every path once it exists
            let _ = DeleteObject(dib.into());
            copied
        }
        Err(_) => None,
    };

    let _ = DeleteDC(mem_dc);
    ReleaseDC(Some(HWND::default()), screen);
    pixels
}

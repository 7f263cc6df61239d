//! EGL/OpenGL backend: pixmaps become textures through `EGL_KHR_image_pixmap`,
//! the texture backs a framebuffer, and `glReadPixels` copies it out.

use anyhow::{bail, Context, Result};
use gl::types::{GLenum, GLuint};
use khronos_egl as egl;
use std::ffi::c_void;
use std::ptr;
use tracing::{debug, info, warn};

use crate::capture::{FrameSize, GraphicsContext, PixmapId};

const PLATFORM_XCB_EXT: egl::Enum = 0x31DC;
const PLATFORM_XCB_SCREEN_EXT: egl::Attrib = 0x31DE;
const NATIVE_PIXMAP_KHR: egl::Enum = 0x30B0;

type ImageTargetTexture2dOes = unsafe extern "system" fn(target: GLenum, image: *const c_void);

fn check_gl(call: &str) -> Result<()> {
    // SAFETY: only called with a current context.
    let error = unsafe { gl::GetError() };
    if error != gl::NO_ERROR {
        bail!("{call} failed: GL error {error:#x}");
    }
    Ok(())
}

/// A surfaceless OpenGL context with one texture and the framebuffer it backs.
pub struct EglContext {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    context: egl::Context,
    image: Option<egl::Image>,
    texture: GLuint,
    framebuffer: GLuint,
    image_target_texture: ImageTargetTexture2dOes,
}

impl EglContext {
    /// Create a context on the X server behind `xcb_connection`.
    ///
    /// # Safety
    ///
    /// `xcb_connection` must be a live `xcb_connection_t*` that outlives the
    /// returned context.
    pub unsafe fn new(xcb_connection: *mut c_void, screen: usize) -> Result<Self> {
        let egl = egl::Instance::new(egl::Static);

        let display = egl
            .get_platform_display(
                PLATFORM_XCB_EXT,
                xcb_connection,
                &[PLATFORM_XCB_SCREEN_EXT, screen as egl::Attrib, egl::ATTRIB_NONE],
            )
            .context("Failed to get EGL display for XCB connection")?;

        let (major, minor) = egl
            .initialize(display)
            .context("Failed to initialize EGL")?;
        info!("EGL version {major}.{minor}");

        match Self::with_display(egl, display) {
            Ok(context) => Ok(context),
            Err(e) => {
                let _ = egl::Instance::new(egl::Static).terminate(display);
                Err(e)
            }
        }
    }

    fn with_display(egl: egl::Instance<egl::Static>, display: egl::Display) -> Result<Self> {
        egl.bind_api(egl::OPENGL_API)
            .context("Failed to bind OpenGL API")?;

        let config = egl
            .choose_first_config(display, &[egl::RENDERABLE_TYPE, egl::OPENGL_BIT, egl::NONE])
            .context("Failed to choose EGL config")?
            .context("No EGL config supports OpenGL")?;

        let context = egl
            .create_context(display, config, None, &[egl::NONE])
            .context("Failed to create EGL context")?;
        debug!(context = ?context.as_ptr(), "created EGL context");

        egl.make_current(display, None, None, Some(context))
            .context("Failed to make EGL context current")?;

        gl::load_with(|name| {
            egl.get_proc_address(name)
                .map_or(ptr::null(), |f| f as *const c_void)
        });

        let Some(proc) = egl.get_proc_address("glEGLImageTargetTexture2DOES") else {
            let _ = egl.make_current(display, None, None, None);
            let _ = egl.destroy_context(display, context);
            bail!("glEGLImageTargetTexture2DOES is not available");
        };
        // SAFETY: the extension defines exactly this signature.
        let image_target_texture: ImageTargetTexture2dOes = unsafe { std::mem::transmute(proc) };

        let mut texture = 0;
        let mut framebuffer = 0;
        // SAFETY: the context created above is current on this thread.
        unsafe {
            gl::GenTextures(1, &mut texture);
            gl::GenFramebuffers(1, &mut framebuffer);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as i32);
            gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture,
                0,
            );
        }
        let setup = check_gl("framebuffer setup");

        egl.make_current(display, None, None, None)
            .context("Failed to release EGL context")?;

        let context = Self {
            egl,
            display,
            context,
            image: None,
            texture,
            framebuffer,
            image_target_texture,
        };
        setup?;
        Ok(context)
    }
}

impl GraphicsContext for EglContext {
    fn make_current(&mut self) -> Result<()> {
        self.egl
            .make_current(self.display, None, None, Some(self.context))
            .context("Failed to make EGL context current")
    }

    fn release_current(&mut self) -> Result<()> {
        self.egl
            .make_current(self.display, None, None, None)
            .context("Failed to release EGL context")
    }

    fn import_pixmap(&mut self, pixmap: PixmapId) -> Result<()> {
        self.release_image()?;

        // SAFETY: a null context is required for pixmap targets; the buffer is an
        // XID carried in a pointer-sized value as EGL_EXT_platform_xcb specifies.
        let image = unsafe {
            self.egl.create_image(
                self.display,
                egl::Context::from_ptr(egl::NO_CONTEXT),
                NATIVE_PIXMAP_KHR,
                egl::ClientBuffer::from_ptr(pixmap as usize as *mut c_void),
                &[egl::ATTRIB_NONE],
            )
        }
        .with_context(|| format!("Failed to create EGL image for pixmap {pixmap:#x}"))?;
        self.image = Some(image);

        // SAFETY: the caller made the context current.
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, self.texture);
            (self.image_target_texture)(gl::TEXTURE_2D, image.as_ptr() as *const c_void);
        }
        check_gl("glEGLImageTargetTexture2DOES")
    }

    fn release_image(&mut self) -> Result<()> {
        if let Some(image) = self.image.take() {
            self.egl
                .destroy_image(self.display, image)
                .context("Failed to destroy EGL image")?;
        }
        Ok(())
    }

    fn read_pixels(&mut self, size: FrameSize, dst: &mut [u8]) -> Result<()> {
        if dst.len() < size.byte_len() {
            bail!(
                "Destination holds {} bytes, {}x{} needs {}",
                dst.len(),
                size.width,
                size.height,
                size.byte_len()
            );
        }

        // SAFETY: the caller made the context current; `dst` is large enough for
        // width * height tightly packed BGRA pixels.
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, self.framebuffer);
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            if status != gl::FRAMEBUFFER_COMPLETE {
                bail!("Framebuffer incomplete: {status:#x}");
            }
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::ReadPixels(
                0,
                0,
                size.width as i32,
                size.height as i32,
                gl::BGRA,
                gl::UNSIGNED_BYTE,
                dst.as_mut_ptr() as *mut c_void,
            );
        }
        check_gl("glReadPixels")
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        if self.make_current().is_ok() {
            if let Err(e) = self.release_image() {
                warn!("{e:#}");
            }
            // SAFETY: the context is current and owns both names.
            unsafe {
                gl::DeleteFramebuffers(1, &self.framebuffer);
                gl::DeleteTextures(1, &self.texture);
            }
            let _ = self.release_current();
        }
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}

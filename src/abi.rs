//! Presenting the capturer to C++ callers as a `webrtc::DesktopCapturer`.
//!
//! Layouts follow the Itanium C++ ABI on x86-64: polymorphic objects start with a
//! vtable pointer, a by-value `std::unique_ptr` parameter is passed as a pointer to
//! a caller-owned slot, and a `std::unique_ptr` return value is written through a
//! hidden first argument.

use std::ffi::c_void;
use std::ptr::{self, NonNull};
use tracing::{error, info, warn};

use crate::capture::{CaptureCallback, CaptureResult, DesktopCapturer, Frame, WindowId};
use crate::interpose::Interposer;

/// `webrtc::DesktopSize`, passed by value in one register.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSize {
    pub width: i32,
    pub height: i32,
}

/// Leading part of a `webrtc::DesktopFrame`.
#[repr(C)]
pub struct ForeignFrame {
    vtable: *const FrameVtable,
    data: *mut u8,
}

#[repr(C)]
pub struct FrameVtable {
    pub complete_dtor: unsafe extern "C" fn(*mut ForeignFrame),
    pub deleting_dtor: unsafe extern "C" fn(*mut ForeignFrame),
}

type FrameConstructor = unsafe extern "C" fn(*mut ForeignFrame, DesktopSize);

/// Bytes reserved for one `BasicDesktopFrame`, above its size in any known release.
pub const FRAME_ALLOCATION: usize = 256;

/// Builds `BasicDesktopFrame`s with the real library's own constructor, so the
/// receiver can destroy them with its own destructor.
#[derive(Clone, Copy)]
pub struct ForeignFrameFactory {
    constructor: FrameConstructor,
}

impl ForeignFrameFactory {
    /// # Safety
    ///
    /// `address` must be the complete-object constructor
    /// `BasicDesktopFrame::BasicDesktopFrame(DesktopSize)`, or a function with its
    /// signature and effect.
    pub unsafe fn from_address(address: usize) -> Self {
        Self {
            constructor: std::mem::transmute::<usize, FrameConstructor>(address),
        }
    }

    /// A foreign frame holding a copy of `frame`'s pixels.
    ///
    /// Storage comes from `calloc`, which the frame's `operator delete` releases
    /// with `free`.
    pub fn build(&self, frame: &Frame) -> Option<NonNull<ForeignFrame>> {
        let size = DesktopSize {
            width: i32::try_from(frame.width()).ok()?,
            height: i32::try_from(frame.height()).ok()?,
        };

        // SAFETY: the allocation is large enough for the object the constructor
        // initialises; the data buffer it allocates holds width * height * 4 bytes.
        unsafe {
            let raw = NonNull::new(libc::calloc(1, FRAME_ALLOCATION) as *mut ForeignFrame)?;
            (self.constructor)(raw.as_ptr(), size);

            let data = (*raw.as_ptr()).data;
            if data.is_null() {
                destroy_frame(raw.as_ptr());
                return None;
            }
            ptr::copy_nonoverlapping(frame.data.as_ptr(), data, frame.size.byte_len());
            Some(raw)
        }
    }
}

unsafe fn destroy_frame(frame: *mut ForeignFrame) {
    ((*(*frame).vtable).deleting_dtor)(frame);
}

/// A `webrtc::DesktopCapturer::Callback*` handed to `Start`.
#[repr(C)]
pub struct ForeignCallback {
    vtable: *const CallbackVtable,
}

/// `webrtc::DesktopCapturer::Callback` from `desktop_capturer.h` before
/// `OnFrameCaptureStart` was added ahead of `OnCaptureResult`. Hosts built from
/// later libwebrtc revisions expect `OnCaptureResult` in slot 1 instead.
#[repr(C)]
pub struct CallbackVtable {
    pub on_capture_result:
        unsafe extern "C" fn(*mut ForeignCallback, result: i32, frame: *mut *mut ForeignFrame),
}

struct ForeignCallbackSink {
    callback: NonNull<ForeignCallback>,
    frames: ForeignFrameFactory,
}

impl CaptureCallback for ForeignCallbackSink {
    fn on_capture_result(&mut self, mut result: CaptureResult, frame: Option<Frame>) {
        let mut foreign = match frame {
            Some(frame) => match self.frames.build(&frame) {
                Some(built) => built.as_ptr(),
                None => {
                    warn!("Failed to build foreign frame");
                    result = CaptureResult::ErrorTemporary;
                    ptr::null_mut()
                }
            },
            None => ptr::null_mut(),
        };

        // SAFETY: the callback outlives the capturer it was registered with. The
        // slot is ours again after the call; whatever is left in it we destroy.
        unsafe {
            let callback = self.callback.as_ptr();
            ((*(*callback).vtable).on_capture_result)(callback, result as i32, &mut foreign);
            if !foreign.is_null() {
                destroy_frame(foreign);
            }
        }
    }
}

/// Object returned to C++ in place of the original window capturer.
#[repr(C)]
pub struct ForeignCapturer {
    vtable: &'static CapturerVtable,
    frames: ForeignFrameFactory,
    capturer: Box<dyn DesktopCapturer>,
}

/// `webrtc::DesktopCapturer`'s virtual functions in declaration order, for the
/// same `desktop_capturer.h` revision as [`CallbackVtable`], where `IsOccluded`
/// is the last virtual.
#[repr(C)]
pub struct CapturerVtable {
    pub complete_dtor: unsafe extern "C" fn(*mut ForeignCapturer),
    pub deleting_dtor: unsafe extern "C" fn(*mut ForeignCapturer),
    pub start: unsafe extern "C" fn(*mut ForeignCapturer, *mut ForeignCallback),
    pub set_shared_memory_factory: unsafe extern "C" fn(*mut ForeignCapturer, *mut c_void),
    pub capture_frame: unsafe extern "C" fn(*mut ForeignCapturer),
    pub set_excluded_window: unsafe extern "C" fn(*mut ForeignCapturer, isize),
    pub get_source_list: unsafe extern "C" fn(*mut ForeignCapturer, *mut c_void) -> bool,
    pub select_source: unsafe extern "C" fn(*mut ForeignCapturer, isize) -> bool,
    pub focus_on_selected_source: unsafe extern "C" fn(*mut ForeignCapturer) -> bool,
    pub is_occluded: unsafe extern "C" fn(*mut ForeignCapturer, *const c_void) -> bool,
}

static CAPTURER_VTABLE: CapturerVtable = CapturerVtable {
    complete_dtor: capturer_complete_dtor,
    deleting_dtor: capturer_deleting_dtor,
    start: capturer_start,
    set_shared_memory_factory: capturer_set_shared_memory_factory,
    capture_frame: capturer_capture_frame,
    set_excluded_window: capturer_set_excluded_window,
    get_source_list: capturer_get_source_list,
    select_source: capturer_select_source,
    focus_on_selected_source: capturer_focus_on_selected_source,
    is_occluded: capturer_is_occluded,
};

impl ForeignCapturer {
    pub fn boxed(capturer: Box<dyn DesktopCapturer>, frames: ForeignFrameFactory) -> Box<Self> {
        Box::new(Self {
            vtable: &CAPTURER_VTABLE,
            frames,
            capturer,
        })
    }

    pub fn vtable(&self) -> &'static CapturerVtable {
        self.vtable
    }
}

unsafe extern "C" fn capturer_complete_dtor(this: *mut ForeignCapturer) {
    info!("~WindowCapturer");
    ptr::drop_in_place(this);
}

unsafe extern "C" fn capturer_deleting_dtor(this: *mut ForeignCapturer) {
    info!("~WindowCapturer");
    drop(Box::from_raw(this));
}

unsafe extern "C" fn capturer_start(this: *mut ForeignCapturer, callback: *mut ForeignCallback) {
    let this = &mut *this;
    match NonNull::new(callback) {
        Some(callback) => this.capturer.start(Box::new(ForeignCallbackSink {
            callback,
            frames: this.frames,
        })),
        None => warn!("Start called with a null callback"),
    }
}

unsafe extern "C" fn capturer_set_shared_memory_factory(_this: *mut ForeignCapturer, _factory: *mut c_void) {}

unsafe extern "C" fn capturer_capture_frame(this: *mut ForeignCapturer) {
    (*this).capturer.capture_frame();
}

unsafe extern "C" fn capturer_set_excluded_window(_this: *mut ForeignCapturer, _window: isize) {}

unsafe extern "C" fn capturer_get_source_list(_this: *mut ForeignCapturer, _sources: *mut c_void) -> bool {
    true
}

unsafe extern "C" fn capturer_select_source(this: *mut ForeignCapturer, id: isize) -> bool {
    match WindowId::try_from(id) {
        Ok(window) => (*this).capturer.select_source(window),
        Err(_) => {
            warn!(id, "source id is not an X11 window id");
            false
        }
    }
}

unsafe extern "C" fn capturer_focus_on_selected_source(_this: *mut ForeignCapturer) -> bool {
    false
}

unsafe extern "C" fn capturer_is_occluded(_this: *mut ForeignCapturer, _pos: *const c_void) -> bool {
    false
}

/// Replacement for `WindowCapturerX11::CreateRawWindowCapturer`.
///
/// # Safety
///
/// `ret` must point to uninitialised storage for a `std::unique_ptr`.
pub unsafe extern "C" fn create_raw_window_capturer(
    ret: *mut *mut ForeignCapturer,
    _options: *const c_void,
) -> *mut *mut ForeignCapturer {
    info!("CreateRawWindowCapturer");

    let capturer = match Interposer::get() {
        Some(interposer) => {
            match crate::linux::create_capturer(interposer.config().display.as_deref()) {
                Ok(capturer) => Some(ForeignCapturer::boxed(
                    Box::new(capturer),
                    interposer.frame_factory(),
                )),
                Err(e) => {
                    error!("Failed to create window capturer: {e:#}");
                    None
                }
            }
        }
        None => {
            error!("CreateRawWindowCapturer called before the interposer was installed");
            None
        }
    };

    ret.write(capturer.map_or(ptr::null_mut(), Box::into_raw));
    ret
}

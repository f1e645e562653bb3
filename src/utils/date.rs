use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Utc};

/// ローカルの日付 + 時刻を UTC の時刻に変換する
/// DST のギャップで存在しないローカル時刻は UTC 扱いにフォールバックする
fn at_local_time(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let naive = match date.and_hms_opt(hour, 0, 0) {
        Some(naive) => naive,
        None => return Utc::now(),
    };
    match naive.and_local_timezone(Local).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

/// 現在のローカル日の範囲 [開始, 翌日開始)
pub fn local_day_bounds(now: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    (
        at_local_time(today, 0),
        at_local_time(today + Days::new(1), 0),
    )
}

/// 日次サマリーの次回発火時刻: 常に翌日のローカル 09:00
pub fn next_daily_summary_time(now: DateTime<Local>) -> DateTime<Utc> {
    at_local_time(now.date_naive() + Days::new(1), 9)
}

/// 週次レビューの次回発火時刻: 次の月曜日のローカル 09:00
/// 月曜日当日は常に翌週へ送る (当日 09:00 前でもスキップする)
pub fn next_weekly_review_time(now: DateTime<Local>) -> DateTime<Utc> {
    let day = now.weekday().num_days_from_sunday();
    let mut days_until_monday = (8 - day) % 7;
    if days_until_monday == 0 {
        days_until_monday = 7;
    }
    at_local_time(
        now.date_naive() + Days::new(u64::from(days_until_monday)),
        9,
    )
}

/// 月カレンダーのグリッド: 月初を含む週の日曜から月末を含む週の土曜まで
pub fn month_calendar_days(year: i32, month: u32) -> Option<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_month.pred_opt()?;

    let start = first - Days::new(u64::from(first.weekday().num_days_from_sunday()));
    let end = last + Days::new(u64::from(6 - last.weekday().num_days_from_sunday()));

    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        days.push(day);
        day = day + Days::new(1);
    }
    Some(days)
}
